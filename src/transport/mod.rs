//! The `transport` module carries the broker's RPC surface over WebSockets.
//!
//! It defines the JSON framing used between clients and the server, the
//! availability gate every call passes through, the per-connection handlers
//! that forward requests to the broker, and the server lifecycle.

pub mod gate;
pub mod message;
pub mod server;
pub mod websocket;

pub use server::{Server, Shutdown};


#[cfg(test)]
mod websocket_tests;

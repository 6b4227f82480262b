//! # Switchback
//!
//! `switchback` is a lightweight, in-memory pub/sub event broker reachable over
//! a small WebSocket RPC surface. Publishers stream events tagged with a topic;
//! subscribers join a topic under an optional consumer group and receive a
//! round-robin share of that topic's events.
//!
//! ## Core Modules
//!
//! - `broker`: the topic/group/consumer directory, round-robin dispatch and
//!   bounded mailboxes.
//! - `transport`: wire protocol, availability gate, connection handlers and
//!   the server lifecycle.
//! - `client`: a typed client for the Status, Subscribe and Publish calls.
//! - `config`: loading server configuration from files and the environment.
//! - `utils`: the shared error type and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod transport;
pub mod utils;

pub use utils::error::{Error, Result};

/// Version reported by the Status call.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

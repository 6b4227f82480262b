//! The `client` module is a typed client for the switchback RPC surface.
//!
//! It backs the CLI's `status`, `sub` and `random` commands and the
//! end-to-end tests.

pub mod pubsub_client;
pub use pubsub_client::{Client, Publisher, Subscriber};

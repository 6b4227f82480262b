//! Wire protocol
//!
//! One RPC per WebSocket connection. Every frame is a JSON text message
//! tagged by `type`:
//!
//! - Status: `status` → `service_state`
//! - Subscribe: `subscribe` → `subscribed`, then `event`* until either side closes
//! - Publish: `publish` → `accepted`, then client `event`* and `close_send` → `ack`
//!
//! A rejected call gets a single `error` frame and the connection is closed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::broker::message::{Event, Subscription};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Status,
    Subscribe(Subscription),
    Publish,
    Event(Event),
    CloseSend,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ServiceState(ServiceState),
    Subscribed { consumer: String, group: String },
    Accepted,
    Event(Event),
    Ack { events: u64 },
    Error { code: ErrorCode, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unavailable,
    InvalidArgument,
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Response to a Status call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServiceState {
    pub status: String,
    pub uptime: String,
    pub version: String,
}

impl ServiceState {
    pub const OK: &'static str = "ok";
    pub const MAINTENANCE: &'static str = "maintenance";

    pub fn new(maintenance: bool, uptime: std::time::Duration) -> Self {
        let status = if maintenance {
            Self::MAINTENANCE
        } else {
            Self::OK
        };
        // millisecond precision is plenty for a health check
        let uptime = std::time::Duration::from_millis(uptime.as_millis() as u64);
        Self {
            status: status.to_string(),
            uptime: format!("{uptime:?}"),
            version: crate::VERSION.to_string(),
        }
    }
}

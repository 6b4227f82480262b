//! The `error` module defines the error type shared by every layer of `switchback`.
//!
//! Broker-level conditions (`NoConsumers`, `MailboxFull`, `ConsumerClosed`) are
//! group-local and are logged rather than returned to publishers. The remaining
//! variants surface to the single caller whose call produced them.

use tungstenite::error::ProtocolError;

use crate::transport::message::ErrorCode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("the switchback server is currently in maintenance mode")]
    Unavailable,

    #[error("no available consumers")]
    NoConsumers,

    #[error("consumer mailbox is full")]
    MailboxFull,

    #[error("consumer has disconnected")]
    ConsumerClosed,

    #[error("invalid message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("server returned {code}: {message}")]
    Remote { code: ErrorCode, message: String },

    #[error("deadline exceeded")]
    Timeout,

    #[error("server task exited before reporting completion")]
    ServerExited,
}

impl Error {
    /// Wire code reported to a remote caller for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Unavailable => ErrorCode::Unavailable,
            Error::Codec(_) | Error::Protocol(_) => ErrorCode::InvalidArgument,
            Error::Remote { code, .. } => *code,
            _ => ErrorCode::Internal,
        }
    }

    /// True when the peer simply went away: a closed connection, or one
    /// dropped without a closing handshake.
    pub fn is_terminated(&self) -> bool {
        matches!(
            self,
            Error::Transport(
                tungstenite::Error::ConnectionClosed
                    | tungstenite::Error::AlreadyClosed
                    | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake)
            )
        )
    }
}

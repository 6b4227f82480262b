use serde::Deserialize;

use crate::broker::mailbox::{Backpressure, DEFAULT_CAPACITY};

/// Configuration settings for a switchback server.
///
/// Loaded from `config/default.*` and `SWITCHBACK_*` environment variables,
/// e.g. `SWITCHBACK_MAINTENANCE=true` or `SWITCHBACK_BIND_ADDR=0.0.0.0:7773`.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Reject every call except Status. Read once at startup.
    pub maintenance: bool,
    pub bind_addr: String,
    /// `tracing_subscriber::EnvFilter` directive.
    pub log_level: String,
    /// Human readable logs on stderr instead of JSON on stdout.
    pub console_log: bool,
    pub mailbox_capacity: usize,
    pub backpressure: Backpressure,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub maintenance: Option<bool>,
    pub bind_addr: Option<String>,
    pub log_level: Option<String>,
    pub console_log: Option<bool>,
    pub mailbox_capacity: Option<usize>,
    pub backpressure: Option<Backpressure>,
}

impl PartialSettings {
    pub fn merge(self, default: Settings) -> Settings {
        Settings {
            maintenance: self.maintenance.unwrap_or(default.maintenance),
            bind_addr: self.bind_addr.unwrap_or(default.bind_addr),
            log_level: self.log_level.unwrap_or(default.log_level),
            console_log: self.console_log.unwrap_or(default.console_log),
            mailbox_capacity: self.mailbox_capacity.unwrap_or(default.mailbox_capacity),
            backpressure: self.backpressure.unwrap_or(default.backpressure),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            maintenance: false,
            bind_addr: "0.0.0.0:7773".to_string(),
            log_level: "info".to_string(),
            console_log: false,
            mailbox_capacity: DEFAULT_CAPACITY,
            backpressure: Backpressure::Block,
        }
    }
}

//! The `utils` module provides the pieces shared across `switchback`:
//! the crate-wide error type and logging initialization.

pub mod error;
pub mod logging;

#[cfg(test)]
mod tests {
    use super::error::Error;
    use super::logging;
    use crate::transport::message::ErrorCode;

    #[test]
    fn logging_init_accepts_levels() {
        // Should not panic
        logging::init("info", true);
        logging::init("debug", false);
        logging::init("not a directive ===", true);
    }

    #[test]
    fn error_codes_map_to_wire_codes() {
        assert_eq!(Error::Unavailable.code(), ErrorCode::Unavailable);
        assert_eq!(
            Error::Protocol("bad".to_string()).code(),
            ErrorCode::InvalidArgument
        );
        assert_eq!(Error::NoConsumers.code(), ErrorCode::Internal);
        let remote = Error::Remote {
            code: ErrorCode::Unavailable,
            message: "down".to_string(),
        };
        assert_eq!(remote.code(), ErrorCode::Unavailable);
    }

    #[test]
    fn closed_connections_are_clean_terminations() {
        assert!(Error::Transport(tungstenite::Error::ConnectionClosed).is_terminated());
        assert!(Error::Transport(tungstenite::Error::AlreadyClosed).is_terminated());
        assert!(!Error::Unavailable.is_terminated());
    }
}

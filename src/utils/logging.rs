use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging for the application.
///
/// `level` is an `EnvFilter` directive such as `info` or `switchback=debug`;
/// unparseable directives fall back to `info`. Output is JSON on stdout unless
/// `console` is set, in which case human readable lines go to stderr.
pub fn init(level: &str, console: bool) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    // try_init so tests and libraries can call this multiple times without panicking
    if console {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init();
    }
}

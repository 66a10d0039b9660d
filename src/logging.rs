use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber for a binary.
///
/// `RUST_LOG` overrides the default `info` filter. Output goes to stderr so
/// that stdout stays free for the coordinator's run summary.
pub fn init_logging(component: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .init();

    tracing::debug!(component, "logging initialized");
}

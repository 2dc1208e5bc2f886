//! Tracing setup for the CLI.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// Log output goes to stderr so stdout stays clean for command output.
/// The filter honors `RUST_LOG`; without it only warnings and errors are
/// shown.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

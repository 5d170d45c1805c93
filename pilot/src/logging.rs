//! Diagnostic tracing for the pilot.
//!
//! Diagnostics go to stderr and are controlled by `RUST_LOG`. Session reports
//! are product output and go to stdout regardless of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn`, or `pilot=debug` when `verbose`.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=pilot=trace pilot run --objective "open example.com" --mode browser
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose { "pilot=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

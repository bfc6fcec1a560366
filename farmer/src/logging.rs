//! Tracing setup for the farming loop.
//!
//! All output goes to stderr so `farmer scan --json` keeps stdout clean.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `farmer=info` so every transition and
/// recovery decision is visible.
///
/// # Example
/// ```bash
/// RUST_LOG=farmer=debug farmer run
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("farmer=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

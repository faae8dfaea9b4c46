//! Diagnostic tracing for the controller.
//!
//! Tracing goes to stderr and is filtered by `RUST_LOG`. Durable run state
//! lives in the session store (`io/persistence`), not in logs.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `pilot=info` so transitions are visible.
///
/// # Example
/// ```bash
/// RUST_LOG=pilot=debug pilot run spec.yaml
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pilot=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

//! Tracing setup for agents embedding the provisioners.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a JSON subscriber filtered by `RUST_LOG`, or `log_level` when unset.
///
/// Fails if a global subscriber is already installed.
pub fn init(log_level: &str) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
}

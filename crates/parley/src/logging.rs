//! Tracing subscriber setup shared by the binaries

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;
use crate::error::{ParleyError, Result};

/// Filter used when neither RUST_LOG nor `logging.level` is set
pub const DEFAULT_DIRECTIVE: &str = "info,parley=debug";

/// Resolve the filter: RUST_LOG first, then the configured level, then
/// `default_directive`
pub fn env_filter(config: &LoggingConfig, default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = config.level.as_deref().unwrap_or(default_directive);
        EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new(default_directive))
    })
}

/// Install the global subscriber. Log lines go to stderr so stdout stays
/// free for replies.
pub fn init(config: &LoggingConfig, default_directive: &str) -> Result<()> {
    let filter = env_filter(config, default_directive);
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    installed.map_err(|e| ParleyError::Config(format!("Failed to initialize logging: {e}")))
}

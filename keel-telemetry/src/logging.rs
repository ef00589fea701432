//! Process-wide `tracing` subscriber setup.

use keel_core::{KeelResult, LoggingConfig, TelemetryError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise from
/// `config.filter`. Output is JSON lines when `config.json` is set.
///
/// # Errors
///
/// `TelemetryError::SubscriberInit` if the filter directive is invalid or a
/// global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> KeelResult<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|e| TelemetryError::SubscriberInit {
            reason: format!("invalid filter {:?}: {}", config.filter, e),
        })?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if config.json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|e| TelemetryError::SubscriberInit {
        reason: e.to_string(),
    })?;

    tracing::info!(filter = %config.filter, json = config.json, "logging initialized");
    Ok(())
}

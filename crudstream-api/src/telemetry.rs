//! Tracing subscriber initialization.
//!
//! `RUST_LOG` wins when set; otherwise the configured default filter is
//! used. Output is JSON when `CRUDSTREAM_LOG_JSON` is set, plain text
//! otherwise.

use crate::config::TelemetryConfig;
use crudstream_core::{ConfigError, CrudResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. Call once at startup.
pub fn init_tracing(config: &TelemetryConfig) -> CrudResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_filter))
        .map_err(|e| ConfigError::InvalidValue {
            field: "log_filter".to_string(),
            value: config.default_filter.clone(),
            reason: e.to_string(),
        })?;

    let json_layer = config
        .json
        .then(|| tracing_subscriber::fmt::layer().json().with_current_span(false));
    let text_layer = (!config.json).then(|| tracing_subscriber::fmt::layer());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| ConfigError::InvalidValue {
            field: "tracing_subscriber".to_string(),
            value: "global".to_string(),
            reason: e.to_string(),
        })?;

    tracing::info!(json = config.json, "Telemetry initialized");
    Ok(())
}

//! Configuration Module
//!
//! Every setting is read from a `CRUDSTREAM_*` environment variable, falling
//! back to the defaults in [`crate::constants`]. Unparseable values fall
//! back too; [`AppConfig::validate`] rejects values that parse but make no
//! sense.

use crate::constants::*;
use crudstream_core::ConfigError;
use crudstream_events::StreamRoutes;
use std::time::Duration;

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

/// Settings shared by every circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed circuit.
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before going half-open.
    pub cool_down: Duration,
    /// Calls admitted while half-open.
    pub half_open_max_requests: u32,
    /// Consecutive half-open successes needed to close.
    pub success_threshold: u32,
    /// Closed-state counting window. `None` keeps counts until a transition.
    pub interval: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
            cool_down: Duration::from_secs(DEFAULT_CIRCUIT_COOL_DOWN_SECS),
            half_open_max_requests: DEFAULT_CIRCUIT_HALF_OPEN_MAX_REQUESTS,
            success_threshold: DEFAULT_CIRCUIT_SUCCESS_THRESHOLD,
            interval: Some(Duration::from_secs(DEFAULT_CIRCUIT_INTERVAL_SECS)),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create CircuitBreakerConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `CRUDSTREAM_CIRCUIT_FAILURE_THRESHOLD` (default: 5)
    /// - `CRUDSTREAM_CIRCUIT_COOL_DOWN_SECS` (default: 10)
    /// - `CRUDSTREAM_CIRCUIT_HALF_OPEN_MAX_REQUESTS` (default: 3)
    /// - `CRUDSTREAM_CIRCUIT_SUCCESS_THRESHOLD` (default: 1)
    /// - `CRUDSTREAM_CIRCUIT_INTERVAL_SECS`: 0 disables the window (default: 40)
    pub fn from_env() -> Self {
        let interval_secs = env_parse("CRUDSTREAM_CIRCUIT_INTERVAL_SECS")
            .unwrap_or(DEFAULT_CIRCUIT_INTERVAL_SECS);

        Self {
            failure_threshold: env_parse("CRUDSTREAM_CIRCUIT_FAILURE_THRESHOLD")
                .unwrap_or(DEFAULT_CIRCUIT_FAILURE_THRESHOLD),
            cool_down: Duration::from_secs(
                env_parse("CRUDSTREAM_CIRCUIT_COOL_DOWN_SECS")
                    .unwrap_or(DEFAULT_CIRCUIT_COOL_DOWN_SECS),
            ),
            half_open_max_requests: env_parse("CRUDSTREAM_CIRCUIT_HALF_OPEN_MAX_REQUESTS")
                .unwrap_or(DEFAULT_CIRCUIT_HALF_OPEN_MAX_REQUESTS),
            success_threshold: env_parse("CRUDSTREAM_CIRCUIT_SUCCESS_THRESHOLD")
                .unwrap_or(DEFAULT_CIRCUIT_SUCCESS_THRESHOLD),
            interval: (interval_secs > 0).then(|| Duration::from_secs(interval_secs)),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(invalid("failure_threshold", 0, "must be at least 1"));
        }
        if self.cool_down.is_zero() {
            return Err(invalid("cool_down", "0s", "must be positive"));
        }
        if self.half_open_max_requests == 0 {
            return Err(invalid("half_open_max_requests", 0, "must be at least 1"));
        }
        if self.success_threshold == 0 || self.success_threshold > self.half_open_max_requests {
            return Err(invalid(
                "success_threshold",
                self.success_threshold,
                "must be between 1 and half_open_max_requests",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// CACHE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL applied when the reader repopulates the cache.
    pub entry_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entry_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
        }
    }
}

impl CacheConfig {
    /// Reads `CRUDSTREAM_CACHE_TTL_SECS` (default: 120).
    pub fn from_env() -> Self {
        Self {
            entry_ttl: Duration::from_secs(
                env_parse("CRUDSTREAM_CACHE_TTL_SECS").unwrap_or(DEFAULT_CACHE_TTL_SECS),
            ),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }
}

// ============================================================================
// STREAMS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub user_stream: String,
    pub repository_stream: String,
    pub review_log_stream: String,
    pub consumer_group: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            user_stream: DEFAULT_USER_STREAM.to_string(),
            repository_stream: DEFAULT_REPOSITORY_STREAM.to_string(),
            review_log_stream: DEFAULT_REVIEW_LOG_STREAM.to_string(),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
        }
    }
}

impl StreamConfig {
    /// Environment variables:
    /// - `CRUDSTREAM_USER_STREAM` (default: user-events)
    /// - `CRUDSTREAM_REPOSITORY_STREAM` (default: repository-events)
    /// - `CRUDSTREAM_REVIEW_LOG_STREAM` (default: review-log-events)
    /// - `CRUDSTREAM_CONSUMER_GROUP` (default: crud-group)
    pub fn from_env() -> Self {
        Self {
            user_stream: env_string("CRUDSTREAM_USER_STREAM", DEFAULT_USER_STREAM),
            repository_stream: env_string(
                "CRUDSTREAM_REPOSITORY_STREAM",
                DEFAULT_REPOSITORY_STREAM,
            ),
            review_log_stream: env_string(
                "CRUDSTREAM_REVIEW_LOG_STREAM",
                DEFAULT_REVIEW_LOG_STREAM,
            ),
            consumer_group: env_string("CRUDSTREAM_CONSUMER_GROUP", DEFAULT_CONSUMER_GROUP),
        }
    }

    pub fn routes(&self) -> StreamRoutes {
        StreamRoutes::new(
            &self.user_stream,
            &self.repository_stream,
            &self.review_log_stream,
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let names = [
            &self.user_stream,
            &self.repository_stream,
            &self.review_log_stream,
        ];
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(invalid("stream", name, "each entity kind needs its own stream"));
            }
        }
        Ok(())
    }
}

// ============================================================================
// SHUTDOWN
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownConfig {
    /// Sleep between checks of the in-flight counter.
    pub poll_interval: Duration,
    /// Give up waiting on in-flight tasks after this long.
    pub drain_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_SHUTDOWN_POLL_SECS),
            drain_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_DRAIN_TIMEOUT_SECS),
        }
    }
}

impl ShutdownConfig {
    /// Environment variables:
    /// - `CRUDSTREAM_SHUTDOWN_POLL_SECS` (default: 1)
    /// - `CRUDSTREAM_SHUTDOWN_DRAIN_TIMEOUT_SECS` (default: 30)
    pub fn from_env() -> Self {
        Self {
            poll_interval: Duration::from_secs(
                env_parse("CRUDSTREAM_SHUTDOWN_POLL_SECS").unwrap_or(DEFAULT_SHUTDOWN_POLL_SECS),
            ),
            drain_timeout: Duration::from_secs(
                env_parse("CRUDSTREAM_SHUTDOWN_DRAIN_TIMEOUT_SECS")
                    .unwrap_or(DEFAULT_SHUTDOWN_DRAIN_TIMEOUT_SECS),
            ),
        }
    }
}

// ============================================================================
// ALERTS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifierConfig {
    /// Chat webhook that receives circuit state changes.
    pub webhook_url: Option<String>,
}

impl NotifierConfig {
    /// Reads `CRUDSTREAM_ALERT_WEBHOOK_URL` (default: unset, log only).
    pub fn from_env() -> Self {
        Self {
            webhook_url: std::env::var("CRUDSTREAM_ALERT_WEBHOOK_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        }
    }
}

// ============================================================================
// TELEMETRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Emit JSON log lines instead of human-readable ones.
    pub json: bool,
    /// Filter used when `RUST_LOG` is unset.
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            json: false,
            default_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Reads `CRUDSTREAM_LOG_JSON` ("true" or "1").
    pub fn from_env() -> Self {
        Self {
            json: std::env::var("CRUDSTREAM_LOG_JSON")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
            ..Self::default()
        }
    }
}

// ============================================================================
// APP
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    pub circuit: CircuitBreakerConfig,
    pub cache: CacheConfig,
    pub streams: StreamConfig,
    pub shutdown: ShutdownConfig,
    pub notifier: NotifierConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            circuit: CircuitBreakerConfig::from_env(),
            cache: CacheConfig::from_env(),
            streams: StreamConfig::from_env(),
            shutdown: ShutdownConfig::from_env(),
            notifier: NotifierConfig::from_env(),
            telemetry: TelemetryConfig::from_env(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.circuit.validate()?;
        if self.cache.entry_ttl.is_zero() {
            return Err(invalid("cache.entry_ttl", "0s", "must be positive"));
        }
        self.streams.validate()?;
        if self.shutdown.poll_interval.is_zero() {
            return Err(invalid("shutdown.poll_interval", "0s", "must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.circuit.failure_threshold, 5);
        assert_eq!(config.circuit.cool_down, Duration::from_secs(10));
        assert_eq!(config.circuit.half_open_max_requests, 3);
        assert_eq!(config.circuit.interval, Some(Duration::from_secs(40)));
        assert_eq!(config.cache.entry_ttl, Duration::from_secs(120));
        assert_eq!(config.streams.consumer_group, "crud-group");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config = AppConfig::default();
        config.circuit.failure_threshold = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "failure_threshold"
        ));
    }

    #[test]
    fn test_validate_rejects_success_threshold_above_probe_budget() {
        let config = CircuitBreakerConfig {
            success_threshold: 4,
            ..CircuitBreakerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_shared_stream() {
        let mut config = AppConfig::default();
        config.streams.review_log_stream = config.streams.user_stream.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_routes_follow_stream_names() {
        let routes = StreamConfig::default().routes();
        assert_eq!(
            routes.kind_for("repository-events"),
            Some(crudstream_core::EntityKind::Repository)
        );
    }
}

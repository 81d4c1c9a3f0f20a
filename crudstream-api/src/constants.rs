//! Constants for crudstream
//!
//! Default values for every setting `AppConfig::from_env` reads.

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

/// Consecutive failures that open a closed circuit
pub const DEFAULT_CIRCUIT_FAILURE_THRESHOLD: u32 = 5;

/// Seconds an open circuit waits before letting probes through
pub const DEFAULT_CIRCUIT_COOL_DOWN_SECS: u64 = 10;

/// Probes admitted while half-open
pub const DEFAULT_CIRCUIT_HALF_OPEN_MAX_REQUESTS: u32 = 3;

/// Consecutive probe successes that close a half-open circuit
pub const DEFAULT_CIRCUIT_SUCCESS_THRESHOLD: u32 = 1;

/// Seconds after which a closed circuit clears its counts (0 disables)
pub const DEFAULT_CIRCUIT_INTERVAL_SECS: u64 = 40;

/// Breaker name for the durable store
pub const STORAGE_DEPENDENCY: &str = "storage";

/// Breaker name for the cache
pub const CACHE_DEPENDENCY: &str = "cache";

// ============================================================================
// CACHE
// ============================================================================

/// TTL for cached entity snapshots (2 minutes)
pub const DEFAULT_CACHE_TTL_SECS: u64 = 120;

// ============================================================================
// STREAMS
// ============================================================================

pub const DEFAULT_USER_STREAM: &str = "user-events";
pub const DEFAULT_REPOSITORY_STREAM: &str = "repository-events";
pub const DEFAULT_REVIEW_LOG_STREAM: &str = "review-log-events";
pub const DEFAULT_CONSUMER_GROUP: &str = "crud-group";

// ============================================================================
// SHUTDOWN
// ============================================================================

/// Seconds between checks of the in-flight task counter
pub const DEFAULT_SHUTDOWN_POLL_SECS: u64 = 1;

/// Upper bound on waiting for in-flight tasks
pub const DEFAULT_SHUTDOWN_DRAIN_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// TELEMETRY
// ============================================================================

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "crudstream=debug,info";

//! crudstream API - Coordination Layer
//!
//! Sits between request handlers and the storage adapters:
//!
//! - Reads go through [`CachedStore`]: cache first, durable store on miss,
//!   each behind its own [`CircuitBreaker`].
//! - Writes are validated, then published as events in tracked background
//!   tasks. The [`EventConsumer`](crudstream_events::EventConsumer) applies
//!   them and the [`CacheInvalidator`] drops stale cache entries.
//! - [`AppState`] wires it all together; the `crudstream` binary runs it
//!   with in-memory adapters until Ctrl-C.

pub mod cached_store;
pub mod config;
pub mod constants;
pub mod health;
pub mod invalidator;
pub mod resilience;
pub mod services;
pub mod state;
pub mod tasks;
pub mod telemetry;

pub use cached_store::CachedStore;
pub use config::{
    AppConfig, CacheConfig, CircuitBreakerConfig, NotifierConfig, ShutdownConfig, StreamConfig,
    TelemetryConfig,
};
pub use health::HealthService;
pub use invalidator::CacheInvalidator;
pub use resilience::{
    alert_channel, AlertDispatcher, AlertNotifier, AlertSender, CircuitBreaker,
    CircuitBreakerRegistry, CircuitCounts, CircuitSnapshot, LogNotifier, StateChange,
    WebhookNotifier,
};
pub use services::{RepositoryService, ReviewLogService, UserService, WriteDispatcher};
pub use state::AppState;
pub use tasks::{ShutdownReport, TaskTracker};

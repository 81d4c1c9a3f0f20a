//! Failure isolation for remote dependencies.
//!
//! - [`CircuitBreaker`]: closed/open/half-open guard around one dependency
//! - [`CircuitBreakerRegistry`]: one shared breaker per dependency name
//! - [`AlertNotifier`]: where state changes are reported

mod circuit_breaker;
mod notifier;
mod registry;

pub use circuit_breaker::{CircuitBreaker, CircuitCounts};
pub use notifier::{
    alert_channel, AlertDispatcher, AlertNotifier, AlertSender, LogNotifier, StateChange,
    WebhookNotifier,
};
pub use registry::{CircuitBreakerRegistry, CircuitSnapshot};

//! One breaker per dependency name, shared by every caller.

use super::circuit_breaker::{CircuitBreaker, CircuitCounts};
use super::notifier::AlertSender;
use crate::config::CircuitBreakerConfig;
use crudstream_core::CircuitState;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub requests: u32,
}

impl CircuitSnapshot {
    fn of(breaker: &CircuitBreaker) -> Self {
        let state = breaker.state();
        let CircuitCounts {
            consecutive_failures,
            requests,
            ..
        } = breaker.counts();
        Self {
            name: breaker.name().to_string(),
            state,
            consecutive_failures,
            requests,
        }
    }
}

pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    alerts: Option<AlertSender>,
    breakers: RwLock<BTreeMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            alerts: None,
            breakers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Breakers created from now on publish their state changes to `alerts`.
    pub fn with_alerts(mut self, alerts: AlertSender) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Breaker for `name`, created with the registry's config on first use.
    pub async fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().await.get(name) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write().await;
        let breaker = breakers.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!(circuit = name, "Creating circuit breaker");
            let breaker = CircuitBreaker::new(name, self.config.clone());
            let breaker = match &self.alerts {
                Some(alerts) => breaker.with_alerts(alerts.clone()),
                None => breaker,
            };
            Arc::new(breaker)
        });
        Arc::clone(breaker)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().await.get(name).cloned()
    }

    /// Every breaker, ordered by name.
    pub async fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let breakers = self.breakers.read().await;
        breakers.values().map(|b| CircuitSnapshot::of(b)).collect()
    }
}

//! Liveness and readiness.
//!
//! Readiness pings each dependency through its breaker:
//!
//! - storage down, or its circuit open: unhealthy (reads have no fallback)
//! - cache down, or its circuit open: degraded (reads fall back to storage)
//! - answering with a circuit that is not closed: degraded

use crate::constants::{CACHE_DEPENDENCY, STORAGE_DEPENDENCY};
use crate::resilience::CircuitBreaker;
use crudstream_core::{
    CircuitState, CrudError, CrudResult, HealthCheck, HealthReport, HealthStatus,
};
use crudstream_storage::{CacheBackend, EntityStore};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct HealthService {
    store: Arc<dyn EntityStore>,
    cache: Arc<dyn CacheBackend>,
    store_breaker: Arc<CircuitBreaker>,
    cache_breaker: Arc<CircuitBreaker>,
    started_at: Instant,
}

impl HealthService {
    pub fn new(
        store: Arc<dyn EntityStore>,
        cache: Arc<dyn CacheBackend>,
        store_breaker: Arc<CircuitBreaker>,
        cache_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            store,
            cache,
            store_breaker,
            cache_breaker,
            started_at: Instant::now(),
        }
    }

    /// The process is up.
    pub fn liveness(&self) -> HealthCheck {
        HealthCheck::healthy("process").with_metadata(
            "uptime_seconds",
            Value::from(self.started_at.elapsed().as_secs()),
        )
    }

    pub async fn readiness(&self) -> HealthReport {
        let store = Arc::clone(&self.store);
        let storage = probe(
            STORAGE_DEPENDENCY,
            &self.store_breaker,
            HealthStatus::Unhealthy,
            move || async move {
                store.ping().await?;
                let stats = store.statistics().await?;
                Ok::<_, CrudError>(serde_json::to_value(stats)?)
            },
        )
        .await;

        let cache = Arc::clone(&self.cache);
        let cache = probe(
            CACHE_DEPENDENCY,
            &self.cache_breaker,
            HealthStatus::Degraded,
            move || async move {
                cache.ping().await?;
                let stats = cache.stats().await?;
                Ok::<_, CrudError>(serde_json::json!({
                    "hits": stats.hits,
                    "misses": stats.misses,
                    "entries": stats.entry_count,
                    "hit_rate": stats.hit_rate(),
                }))
            },
        )
        .await;

        let report = HealthReport::from_checks(vec![storage, cache]);
        if report.status != HealthStatus::Healthy {
            tracing::warn!(status = ?report.status, "Readiness degraded");
        }
        report
    }
}

async fn probe<F, Fut>(
    component: &str,
    breaker: &CircuitBreaker,
    on_failure: HealthStatus,
    ping: F,
) -> HealthCheck
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = CrudResult<Value>>,
{
    let start = Instant::now();
    let result = breaker.execute(ping).await;
    let elapsed_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);
    let circuit = breaker.state();

    let check = match result {
        Ok(stats) if circuit == CircuitState::Closed => HealthCheck::healthy(component)
            .with_response_time(elapsed_ms)
            .with_metadata("stats", stats),
        Ok(stats) => HealthCheck::degraded(component, format!("circuit {}", circuit))
            .with_response_time(elapsed_ms)
            .with_metadata("stats", stats),
        Err(e) => match on_failure {
            HealthStatus::Unhealthy => HealthCheck::unhealthy(component, e.to_string()),
            _ => HealthCheck::degraded(component, e.to_string()),
        },
    };
    check.with_metadata("circuit", Value::from(circuit.as_str()))
}

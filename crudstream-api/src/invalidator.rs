//! Cache invalidation after mutations.
//!
//! Deletes go through the cache breaker. A failed delete is only logged:
//! the stale entry expires with its TTL.

use crate::resilience::CircuitBreaker;
use async_trait::async_trait;
use crudstream_core::{EntityId, EntityKind};
use crudstream_events::{AppliedChange, ApplyObserver};
use crudstream_storage::{CacheBackend, CacheKey};
use std::sync::Arc;

#[derive(Clone)]
pub struct CacheInvalidator {
    cache: Arc<dyn CacheBackend>,
    breaker: Arc<CircuitBreaker>,
}

impl CacheInvalidator {
    pub fn new(cache: Arc<dyn CacheBackend>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { cache, breaker }
    }

    /// Remove the cached snapshot for `kind:id`. Returns whether the delete
    /// reached the cache.
    pub async fn invalidate(&self, kind: EntityKind, id: EntityId) -> bool {
        let key = CacheKey::new(kind, id);
        let cache = Arc::clone(&self.cache);
        match self
            .breaker
            .execute(move || async move { cache.delete(&key).await })
            .await
        {
            Ok(()) => {
                tracing::debug!(key = %key, "Cache entry invalidated");
                true
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache invalidation failed");
                false
            }
        }
    }
}

#[async_trait]
impl ApplyObserver for CacheInvalidator {
    async fn on_applied(&self, change: &AppliedChange) {
        self.invalidate(change.kind, change.id).await;
    }
}

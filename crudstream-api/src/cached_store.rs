//! Cache-aside reader.
//!
//! `get` checks the cache first and falls back to the durable store, each
//! through its own circuit breaker:
//!
//! 1. Cache hit with a readable snapshot: returned as-is. The store is not
//!    touched, so a hit is served even while the store breaker is open.
//! 2. Cache miss, unreadable snapshot, or cache unavailable: read the store.
//! 3. Store hit: repopulate the cache (best-effort) and return.
//! 4. Store miss or store unavailable: the error goes to the caller.
//!
//! List queries are not cached; they go straight to the store breaker.

use crate::resilience::CircuitBreaker;
use crudstream_core::{
    AuditLog, CrudError, CrudResult, EntityId, MalformedError, Repository, ReviewLog, User,
};
use crudstream_storage::{
    CacheBackend, CacheKey, CacheableEntity, EntityStore, StorageFetcher, StoreFetcher,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct CachedStore {
    store: Arc<dyn EntityStore>,
    cache: Arc<dyn CacheBackend>,
    store_breaker: Arc<CircuitBreaker>,
    cache_breaker: Arc<CircuitBreaker>,
    ttl: Duration,
}

impl CachedStore {
    pub fn new(
        store: Arc<dyn EntityStore>,
        cache: Arc<dyn CacheBackend>,
        store_breaker: Arc<CircuitBreaker>,
        cache_breaker: Arc<CircuitBreaker>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            store_breaker,
            cache_breaker,
            ttl,
        }
    }

    pub fn store_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.store_breaker
    }

    pub fn cache_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.cache_breaker
    }

    /// Read one entity by id, cache first.
    pub async fn get<T>(&self, id: EntityId) -> CrudResult<T>
    where
        T: CacheableEntity,
        for<'a> StoreFetcher<'a>: StorageFetcher<T>,
    {
        let key = CacheKey::new(T::kind(), id);
        if let Some(entity) = self.read_cache::<T>(key).await {
            return Ok(entity);
        }

        let found = self
            .with_store(move |store| async move {
                let fetcher = StoreFetcher::new(store.as_ref());
                StorageFetcher::<T>::fetch(&fetcher, id).await
            })
            .await?;

        let entity = found.ok_or_else(|| CrudError::not_found(T::kind(), id))?;
        self.write_cache(&entity).await;
        Ok(entity)
    }

    pub async fn get_user(&self, id: EntityId) -> CrudResult<User> {
        self.get::<User>(id).await
    }

    pub async fn get_repository(&self, id: EntityId) -> CrudResult<Repository> {
        self.get::<Repository>(id).await
    }

    pub async fn get_review_log(&self, id: EntityId) -> CrudResult<ReviewLog> {
        self.get::<ReviewLog>(id).await
    }

    // ========================================================================
    // UNCACHED QUERIES
    // ========================================================================

    pub async fn list_users(&self) -> CrudResult<Vec<User>> {
        self.with_store(|store| async move { store.user_list().await })
            .await
    }

    pub async fn find_user_by_email(&self, email: &str) -> CrudResult<Option<User>> {
        let email = email.to_string();
        self.with_store(move |store| async move { store.user_find_by_email(&email).await })
            .await
    }

    pub async fn list_repositories(&self) -> CrudResult<Vec<Repository>> {
        self.with_store(|store| async move { store.repository_list().await })
            .await
    }

    pub async fn list_repositories_for_user(
        &self,
        user_id: EntityId,
    ) -> CrudResult<Vec<Repository>> {
        self.with_store(move |store| async move { store.repository_list_by_user(user_id).await })
            .await
    }

    pub async fn list_review_logs_for_repository(
        &self,
        repository_id: EntityId,
    ) -> CrudResult<Vec<ReviewLog>> {
        self.with_store(move |store| async move {
            store.review_log_list_by_repository(repository_id).await
        })
        .await
    }

    pub async fn list_audit_logs_for_user(&self, user_id: EntityId) -> CrudResult<Vec<AuditLog>> {
        self.with_store(move |store| async move { store.audit_log_list_by_user(user_id).await })
            .await
    }

    /// Run `operation` against the store through the store breaker.
    pub async fn with_store<R, F, Fut>(&self, operation: F) -> CrudResult<R>
    where
        F: FnOnce(Arc<dyn EntityStore>) -> Fut,
        Fut: Future<Output = CrudResult<R>>,
    {
        let store = Arc::clone(&self.store);
        self.store_breaker.execute(move || operation(store)).await
    }

    // ========================================================================
    // CACHE
    // ========================================================================

    async fn read_cache<T: CacheableEntity>(&self, key: CacheKey) -> Option<T> {
        let cache = Arc::clone(&self.cache);
        let lookup = self
            .cache_breaker
            .execute(move || async move { cache.get(&key).await })
            .await;

        match lookup {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(entity) => {
                    tracing::debug!(key = %key, "Cache hit");
                    Some(entity)
                }
                Err(e) => {
                    let error = MalformedError::CachedValue {
                        key: key.to_string(),
                        reason: e.to_string(),
                    };
                    tracing::warn!(error = %error, "Ignoring unreadable cache entry");
                    None
                }
            },
            Ok(None) => {
                tracing::debug!(key = %key, "Cache miss");
                None
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache unavailable, reading from storage");
                None
            }
        }
    }

    async fn write_cache<T: CacheableEntity>(&self, entity: &T) {
        let key = entity.cache_key();
        let value = match serde_json::to_string(entity) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to serialize entity for cache");
                return;
            }
        };

        let cache = Arc::clone(&self.cache);
        let ttl = self.ttl;
        let stored = self
            .cache_breaker
            .execute(move || async move { cache.set_with_ttl(&key, value, ttl).await })
            .await;

        if let Err(e) = stored {
            tracing::warn!(key = %key, error = %e, "Failed to repopulate cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use crudstream_core::EntityKind;
    use crudstream_storage::{InMemoryCacheBackend, InMemoryStorage};

    fn reader(storage: InMemoryStorage, cache: InMemoryCacheBackend) -> CachedStore {
        let config = CircuitBreakerConfig::default();
        CachedStore::new(
            Arc::new(storage),
            Arc::new(cache),
            Arc::new(CircuitBreaker::new("storage", config.clone())),
            Arc::new(CircuitBreaker::new("cache", config)),
            Duration::from_secs(120),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_reads_store_and_populates_cache() {
        let storage = InMemoryStorage::new();
        let cache = InMemoryCacheBackend::new();
        let user = storage.user_insert(&User::draft("Bo", "bo@x.com")).await.unwrap();
        let reader = reader(storage, cache.clone());

        let found = reader.get_user(user.id).await.unwrap();
        assert_eq!(found, user);

        let key = CacheKey::new(EntityKind::User, user.id);
        let cached: User = serde_json::from_str(&cache.peek(&key).unwrap()).unwrap();
        assert_eq!(cached, user);
        assert_eq!(cache.ttl(&key), Some(Duration::from_secs(120)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_row_is_not_found() {
        let reader = reader(InMemoryStorage::new(), InMemoryCacheBackend::new());
        let err = reader.get_repository(404).await.unwrap_err();
        assert_eq!(err, CrudError::not_found(EntityKind::Repository, 404));
        assert_eq!(
            reader.store_breaker().state(),
            crudstream_core::CircuitState::Closed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_cache_entry_falls_through() {
        let storage = InMemoryStorage::new();
        let cache = InMemoryCacheBackend::new();
        let user = storage.user_insert(&User::draft("Bo", "bo@x.com")).await.unwrap();
        let key = CacheKey::new(EntityKind::User, user.id);
        cache
            .set_with_ttl(&key, "{not json".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        let reader = reader(storage, cache.clone());
        assert_eq!(reader.get_user(user.id).await.unwrap(), user);

        let repaired: User = serde_json::from_str(&cache.peek(&key).unwrap()).unwrap();
        assert_eq!(repaired.id, user.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_queries_are_not_cached() {
        let storage = InMemoryStorage::new();
        let cache = InMemoryCacheBackend::new();
        let owner = storage.user_insert(&User::draft("Bo", "bo@x.com")).await.unwrap();
        storage
            .repository_insert(&Repository::draft(owner.id, "a", "https://x/a", false))
            .await
            .unwrap();

        let reader = reader(storage, cache.clone());
        assert_eq!(reader.list_repositories_for_user(owner.id).await.unwrap().len(), 1);
        assert_eq!(reader.list_users().await.unwrap().len(), 1);
        assert_eq!(cache.stats().await.unwrap().entry_count, 0);
    }
}

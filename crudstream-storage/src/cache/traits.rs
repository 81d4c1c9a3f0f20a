//! Cache backend traits and cacheable entity marker.

use crate::cache::CacheKey;
use crate::store::EntityStore;
use async_trait::async_trait;
use crudstream_core::{CrudResult, EntityId, Kinded, Repository, ReviewLog, User};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

/// Marker trait for types that can be cached.
///
/// The cache key is derived from [`Kinded::kind`] and [`entity_id`](Self::entity_id).
pub trait CacheableEntity: Kinded + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn entity_id(&self) -> EntityId;

    fn cache_key(&self) -> CacheKey {
        CacheKey::new(Self::kind(), self.entity_id())
    }
}

impl CacheableEntity for User {
    fn entity_id(&self) -> EntityId {
        self.id
    }
}

impl CacheableEntity for Repository {
    fn entity_id(&self) -> EntityId {
        self.id
    }
}

impl CacheableEntity for ReviewLog {
    fn entity_id(&self) -> EntityId {
        self.id
    }
}

/// Key/value cache with per-entry TTL.
///
/// A missing or expired key is `Ok(None)`. Errors mean the cache itself
/// could not be reached.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> CrudResult<Option<String>>;

    async fn set_with_ttl(&self, key: &CacheKey, value: String, ttl: Duration) -> CrudResult<()>;

    /// Remove a key. Deleting an absent key succeeds.
    async fn delete(&self, key: &CacheKey) -> CrudResult<()>;

    async fn ping(&self) -> CrudResult<()>;

    async fn stats(&self) -> CrudResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Number of entries currently in cache, expired ones included until swept.
    pub entry_count: u64,
    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Fetches an entity from the durable store on cache miss.
#[async_trait]
pub trait StorageFetcher<T: CacheableEntity>: Send + Sync {
    async fn fetch(&self, id: EntityId) -> CrudResult<Option<T>>;
}

/// [`StorageFetcher`] for every entity kind, backed by an [`EntityStore`].
pub struct StoreFetcher<'a> {
    store: &'a dyn EntityStore,
}

impl<'a> StoreFetcher<'a> {
    pub fn new(store: &'a dyn EntityStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StorageFetcher<User> for StoreFetcher<'_> {
    async fn fetch(&self, id: EntityId) -> CrudResult<Option<User>> {
        self.store.user_get(id).await
    }
}

#[async_trait]
impl StorageFetcher<Repository> for StoreFetcher<'_> {
    async fn fetch(&self, id: EntityId) -> CrudResult<Option<Repository>> {
        self.store.repository_get(id).await
    }
}

#[async_trait]
impl StorageFetcher<ReviewLog> for StoreFetcher<'_> {
    async fn fetch(&self, id: EntityId) -> CrudResult<Option<ReviewLog>> {
        self.store.review_log_get(id).await
    }
}

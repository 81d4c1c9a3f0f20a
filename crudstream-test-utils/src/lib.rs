//! crudstream Test Utilities
//!
//! Shared test infrastructure for the crudstream workspace:
//! - Fault-injecting wrappers around the in-memory storage and cache
//! - Proptest generators for entities and events
//! - Fixtures for stream routing and event fields

pub use crudstream_events::{InMemoryStream, StreamRoutes};
pub use crudstream_storage::{InMemoryCacheBackend, InMemoryStorage};

use async_trait::async_trait;
use crudstream_core::{
    AuditLog, CrudError, CrudResult, EntityId, Repository, ReviewLog, User,
};
use crudstream_storage::{CacheBackend, CacheKey, CacheStats, EntityStore, StorageStatistics};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// FIXTURES
// ============================================================================

/// Stream names used across tests.
pub fn test_routes() -> StreamRoutes {
    StreamRoutes::new("user-events", "repository-events", "review-log-events")
}

/// Turn a JSON object literal into an event field map.
pub fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn injected(dependency: &str) -> CrudError {
    CrudError::call_failed(dependency, "injected failure")
}

// ============================================================================
// FLAKY STORAGE
// ============================================================================

/// [`InMemoryStorage`] that can be switched into failing every call.
///
/// Counts calls that reached the store, including failed ones.
#[derive(Debug, Clone, Default)]
pub struct FlakyStorage {
    inner: InMemoryStorage,
    failing: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl FlakyStorage {
    pub fn new(inner: InMemoryStorage) -> Self {
        Self {
            inner,
            failing: Arc::new(AtomicBool::new(false)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn inner(&self) -> &InMemoryStorage {
        &self.inner
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> CrudResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(injected("storage"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EntityStore for FlakyStorage {
    async fn user_insert(&self, user: &User) -> CrudResult<User> {
        self.enter()?;
        self.inner.user_insert(user).await
    }

    async fn user_get(&self, id: EntityId) -> CrudResult<Option<User>> {
        self.enter()?;
        self.inner.user_get(id).await
    }

    async fn user_find_by_email(&self, email: &str) -> CrudResult<Option<User>> {
        self.enter()?;
        self.inner.user_find_by_email(email).await
    }

    async fn user_list(&self) -> CrudResult<Vec<User>> {
        self.enter()?;
        self.inner.user_list().await
    }

    async fn user_update(&self, user: &User) -> CrudResult<()> {
        self.enter()?;
        self.inner.user_update(user).await
    }

    async fn user_delete(&self, id: EntityId) -> CrudResult<()> {
        self.enter()?;
        self.inner.user_delete(id).await
    }

    async fn repository_insert(&self, repository: &Repository) -> CrudResult<Repository> {
        self.enter()?;
        self.inner.repository_insert(repository).await
    }

    async fn repository_get(&self, id: EntityId) -> CrudResult<Option<Repository>> {
        self.enter()?;
        self.inner.repository_get(id).await
    }

    async fn repository_list(&self) -> CrudResult<Vec<Repository>> {
        self.enter()?;
        self.inner.repository_list().await
    }

    async fn repository_list_by_user(&self, user_id: EntityId) -> CrudResult<Vec<Repository>> {
        self.enter()?;
        self.inner.repository_list_by_user(user_id).await
    }

    async fn repository_update(&self, repository: &Repository) -> CrudResult<()> {
        self.enter()?;
        self.inner.repository_update(repository).await
    }

    async fn repository_delete(&self, id: EntityId) -> CrudResult<()> {
        self.enter()?;
        self.inner.repository_delete(id).await
    }

    async fn review_log_insert(&self, log: &ReviewLog) -> CrudResult<ReviewLog> {
        self.enter()?;
        self.inner.review_log_insert(log).await
    }

    async fn review_log_get(&self, id: EntityId) -> CrudResult<Option<ReviewLog>> {
        self.enter()?;
        self.inner.review_log_get(id).await
    }

    async fn review_log_list_by_repository(
        &self,
        repository_id: EntityId,
    ) -> CrudResult<Vec<ReviewLog>> {
        self.enter()?;
        self.inner.review_log_list_by_repository(repository_id).await
    }

    async fn audit_log_append(&self, entry: &AuditLog) -> CrudResult<()> {
        self.enter()?;
        self.inner.audit_log_append(entry).await
    }

    async fn audit_log_list_by_user(&self, user_id: EntityId) -> CrudResult<Vec<AuditLog>> {
        self.enter()?;
        self.inner.audit_log_list_by_user(user_id).await
    }

    async fn ping(&self) -> CrudResult<()> {
        self.enter()?;
        self.inner.ping().await
    }

    async fn statistics(&self) -> CrudResult<StorageStatistics> {
        self.enter()?;
        self.inner.statistics().await
    }
}

// ============================================================================
// FLAKY CACHE
// ============================================================================

/// [`InMemoryCacheBackend`] that can be switched into failing every call.
#[derive(Debug, Clone, Default)]
pub struct FlakyCache {
    inner: InMemoryCacheBackend,
    failing: Arc<AtomicBool>,
    gets: Arc<AtomicUsize>,
    sets: Arc<AtomicUsize>,
    deletes: Arc<AtomicUsize>,
}

impl FlakyCache {
    pub fn new(inner: InMemoryCacheBackend) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn inner(&self) -> &InMemoryCacheBackend {
        &self.inner
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn enter(&self, counter: &AtomicUsize) -> CrudResult<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(injected("cache"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheBackend for FlakyCache {
    async fn get(&self, key: &CacheKey) -> CrudResult<Option<String>> {
        self.enter(&self.gets)?;
        self.inner.get(key).await
    }

    async fn set_with_ttl(&self, key: &CacheKey, value: String, ttl: Duration) -> CrudResult<()> {
        self.enter(&self.sets)?;
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn delete(&self, key: &CacheKey) -> CrudResult<()> {
        self.enter(&self.deletes)?;
        self.inner.delete(key).await
    }

    async fn ping(&self) -> CrudResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(injected("cache"));
        }
        self.inner.ping().await
    }

    async fn stats(&self) -> CrudResult<CacheStats> {
        self.inner.stats().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use crudstream_core::{
        DomainEvent, EntityKind, EventType, RepositoryChanges, RepositoryEvent, ReviewLogEvent,
        UserChanges, UserEvent,
    };
    use proptest::prelude::*;

    pub fn arb_entity_id() -> impl Strategy<Value = i64> {
        1i64..10_000
    }

    pub fn arb_entity_kind() -> impl Strategy<Value = EntityKind> {
        prop_oneof![
            Just(EntityKind::User),
            Just(EntityKind::Repository),
            Just(EntityKind::ReviewLog),
        ]
    }

    pub fn arb_event_type() -> impl Strategy<Value = EventType> {
        proptest::sample::select(EventType::ALL.to_vec())
    }

    pub fn arb_name() -> impl Strategy<Value = String> {
        "[A-Z][a-z]{1,12}"
    }

    pub fn arb_email() -> impl Strategy<Value = String> {
        ("[a-z]{1,10}", "[a-z]{2,8}").prop_map(|(local, domain)| format!("{}@{}.com", local, domain))
    }

    pub fn arb_user_changes() -> impl Strategy<Value = UserChanges> {
        (arb_name(), arb_email()).prop_map(|(name, email)| UserChanges { name, email })
    }

    pub fn arb_repository_changes() -> impl Strategy<Value = RepositoryChanges> {
        ("[a-z][a-z0-9-]{0,15}", any::<bool>()).prop_map(|(name, ai_enabled)| RepositoryChanges {
            url: format!("https://git.example.com/{}", name),
            name,
            ai_enabled,
        })
    }

    pub fn arb_user_event() -> impl Strategy<Value = UserEvent> {
        prop_oneof![
            arb_user_changes().prop_map(UserEvent::Created),
            (arb_entity_id(), arb_user_changes())
                .prop_map(|(id, changes)| UserEvent::Updated { id, changes }),
            arb_entity_id().prop_map(|id| UserEvent::Deleted { id }),
        ]
    }

    pub fn arb_repository_event() -> impl Strategy<Value = RepositoryEvent> {
        prop_oneof![
            (arb_entity_id(), arb_repository_changes())
                .prop_map(|(user_id, changes)| RepositoryEvent::Created { user_id, changes }),
            (arb_entity_id(), arb_repository_changes())
                .prop_map(|(id, changes)| RepositoryEvent::Updated { id, changes }),
            arb_entity_id().prop_map(|id| RepositoryEvent::Deleted { id }),
        ]
    }

    pub fn arb_review_log_event() -> impl Strategy<Value = ReviewLogEvent> {
        (arb_entity_id(), "[a-z ]{1,40}").prop_map(|(repository_id, review_result)| {
            ReviewLogEvent::Created {
                repository_id,
                review_result,
            }
        })
    }

    pub fn arb_domain_event() -> impl Strategy<Value = DomainEvent> {
        prop_oneof![
            arb_user_event().prop_map(DomainEvent::User),
            arb_repository_event().prop_map(DomainEvent::Repository),
            arb_review_log_event().prop_map(DomainEvent::ReviewLog),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flaky_storage_counts_and_fails() {
        let storage = FlakyStorage::new(InMemoryStorage::new());
        assert!(storage.enter().is_ok());
        storage.set_failing(true);
        let err = storage.enter().unwrap_err();
        assert!(err.is_dependency_failure());
        assert_eq!(storage.calls(), 2);
    }

    #[test]
    fn test_fields_from_object() {
        let map = fields(serde_json::json!({"name": "Bo"}));
        assert_eq!(map.get("name"), Some(&Value::from("Bo")));
        assert!(fields(Value::Null).is_empty());
    }
}

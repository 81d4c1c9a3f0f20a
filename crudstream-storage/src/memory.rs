//! In-memory durable store.

use crate::store::{EntityStore, StorageStatistics};
use async_trait::async_trait;
use crudstream_core::{
    AuditLog, CrudError, CrudResult, EntityId, EntityKind, Repository, ReviewLog, StorageError,
    User,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<EntityId, User>,
    repositories: BTreeMap<EntityId, Repository>,
    review_logs: BTreeMap<EntityId, ReviewLog>,
    audit_logs: Vec<AuditLog>,
}

/// In-memory [`EntityStore`] with store-assigned sequential ids.
///
/// Clones share the same tables.
#[derive(Debug, Clone)]
pub struct InMemoryStorage {
    tables: Arc<RwLock<Tables>>,
    next_id: Arc<AtomicI64>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage whose first assigned id is `first_id`.
    pub fn starting_at(first_id: EntityId) -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            next_id: Arc::new(AtomicI64::new(first_id)),
        }
    }

    fn assign_id(&self) -> EntityId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn read(&self) -> CrudResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| CrudError::from(StorageError::LockPoisoned))
    }

    fn write(&self) -> CrudResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| CrudError::from(StorageError::LockPoisoned))
    }
}

#[async_trait]
impl EntityStore for InMemoryStorage {
    // === User Operations ===

    async fn user_insert(&self, user: &User) -> CrudResult<User> {
        let mut tables = self.write()?;
        let mut row = user.clone();
        row.id = self.assign_id();
        tables.users.insert(row.id, row.clone());
        Ok(row)
    }

    async fn user_get(&self, id: EntityId) -> CrudResult<Option<User>> {
        Ok(self.read()?.users.get(&id).cloned())
    }

    async fn user_find_by_email(&self, email: &str) -> CrudResult<Option<User>> {
        Ok(self
            .read()?
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn user_list(&self) -> CrudResult<Vec<User>> {
        Ok(self.read()?.users.values().cloned().collect())
    }

    async fn user_update(&self, user: &User) -> CrudResult<()> {
        let mut tables = self.write()?;
        let row = tables
            .users
            .get_mut(&user.id)
            .ok_or_else(|| CrudError::not_found(EntityKind::User, user.id))?;
        *row = user.clone();
        Ok(())
    }

    async fn user_delete(&self, id: EntityId) -> CrudResult<()> {
        self.write()?
            .users
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| CrudError::not_found(EntityKind::User, id))
    }

    // === Repository Operations ===

    async fn repository_insert(&self, repository: &Repository) -> CrudResult<Repository> {
        let mut tables = self.write()?;
        let mut row = repository.clone();
        row.id = self.assign_id();
        tables.repositories.insert(row.id, row.clone());
        Ok(row)
    }

    async fn repository_get(&self, id: EntityId) -> CrudResult<Option<Repository>> {
        Ok(self.read()?.repositories.get(&id).cloned())
    }

    async fn repository_list(&self) -> CrudResult<Vec<Repository>> {
        Ok(self.read()?.repositories.values().cloned().collect())
    }

    async fn repository_list_by_user(&self, user_id: EntityId) -> CrudResult<Vec<Repository>> {
        Ok(self
            .read()?
            .repositories
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn repository_update(&self, repository: &Repository) -> CrudResult<()> {
        let mut tables = self.write()?;
        let row = tables
            .repositories
            .get_mut(&repository.id)
            .ok_or_else(|| CrudError::not_found(EntityKind::Repository, repository.id))?;
        *row = repository.clone();
        Ok(())
    }

    async fn repository_delete(&self, id: EntityId) -> CrudResult<()> {
        self.write()?
            .repositories
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| CrudError::not_found(EntityKind::Repository, id))
    }

    // === Review Log Operations ===

    async fn review_log_insert(&self, log: &ReviewLog) -> CrudResult<ReviewLog> {
        let mut tables = self.write()?;
        let mut row = log.clone();
        row.id = self.assign_id();
        tables.review_logs.insert(row.id, row.clone());
        Ok(row)
    }

    async fn review_log_get(&self, id: EntityId) -> CrudResult<Option<ReviewLog>> {
        Ok(self.read()?.review_logs.get(&id).cloned())
    }

    async fn review_log_list_by_repository(
        &self,
        repository_id: EntityId,
    ) -> CrudResult<Vec<ReviewLog>> {
        Ok(self
            .read()?
            .review_logs
            .values()
            .filter(|l| l.repository_id == repository_id)
            .cloned()
            .collect())
    }

    // === Audit Operations ===

    async fn audit_log_append(&self, entry: &AuditLog) -> CrudResult<()> {
        self.write()?.audit_logs.push(entry.clone());
        Ok(())
    }

    async fn audit_log_list_by_user(&self, user_id: EntityId) -> CrudResult<Vec<AuditLog>> {
        Ok(self
            .read()?
            .audit_logs
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> CrudResult<()> {
        self.read().map(|_| ())
    }

    async fn statistics(&self) -> CrudResult<StorageStatistics> {
        let tables = self.read()?;
        Ok(StorageStatistics {
            users: tables.users.len(),
            repositories: tables.repositories.len(),
            review_logs: tables.review_logs.len(),
            audit_logs: tables.audit_logs.len(),
        })
    }
}

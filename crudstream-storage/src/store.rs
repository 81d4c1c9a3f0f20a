//! Async storage contract for the durable store.
//!
//! The coordination layer treats the durable store as a collaborator with a
//! fixed CRUD contract. Ids are assigned by the store on insert; any id on
//! the value passed to an `*_insert` method is ignored.

use async_trait::async_trait;
use crudstream_core::{AuditLog, CrudResult, EntityId, Repository, ReviewLog, User};
use serde::Serialize;

/// Async storage trait for the three entity kinds and the audit trail.
///
/// `*_update` and `*_delete` return `CrudError::NotFound` when no row exists
/// for the id. A missing row on `*_get` is `Ok(None)`.
#[async_trait]
pub trait EntityStore: Send + Sync {
    // ========================================================================
    // USER OPERATIONS
    // ========================================================================

    /// Insert a new user and return it with its assigned id.
    async fn user_insert(&self, user: &User) -> CrudResult<User>;

    async fn user_get(&self, id: EntityId) -> CrudResult<Option<User>>;

    async fn user_find_by_email(&self, email: &str) -> CrudResult<Option<User>>;

    /// All users ordered by id.
    async fn user_list(&self) -> CrudResult<Vec<User>>;

    /// Overwrite the row with `user.id`.
    async fn user_update(&self, user: &User) -> CrudResult<()>;

    async fn user_delete(&self, id: EntityId) -> CrudResult<()>;

    // ========================================================================
    // REPOSITORY OPERATIONS
    // ========================================================================

    async fn repository_insert(&self, repository: &Repository) -> CrudResult<Repository>;

    async fn repository_get(&self, id: EntityId) -> CrudResult<Option<Repository>>;

    async fn repository_list(&self) -> CrudResult<Vec<Repository>>;

    async fn repository_list_by_user(&self, user_id: EntityId) -> CrudResult<Vec<Repository>>;

    async fn repository_update(&self, repository: &Repository) -> CrudResult<()>;

    async fn repository_delete(&self, id: EntityId) -> CrudResult<()>;

    // ========================================================================
    // REVIEW LOG OPERATIONS
    // ========================================================================

    async fn review_log_insert(&self, log: &ReviewLog) -> CrudResult<ReviewLog>;

    async fn review_log_get(&self, id: EntityId) -> CrudResult<Option<ReviewLog>>;

    async fn review_log_list_by_repository(
        &self,
        repository_id: EntityId,
    ) -> CrudResult<Vec<ReviewLog>>;

    // ========================================================================
    // AUDIT OPERATIONS
    // ========================================================================

    async fn audit_log_append(&self, entry: &AuditLog) -> CrudResult<()>;

    /// Audit entries for a user, oldest first.
    async fn audit_log_list_by_user(&self, user_id: EntityId) -> CrudResult<Vec<AuditLog>>;

    // ========================================================================
    // HEALTH
    // ========================================================================

    /// Cheap round trip used by readiness checks.
    async fn ping(&self) -> CrudResult<()>;

    async fn statistics(&self) -> CrudResult<StorageStatistics>;
}

/// Row counts per table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageStatistics {
    pub users: usize,
    pub repositories: usize,
    pub review_logs: usize,
    pub audit_logs: usize,
}

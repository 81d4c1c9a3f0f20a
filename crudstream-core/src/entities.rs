//! Core entity structures
//!
//! Entities are owned by the durable store. While a write is in flight as an
//! event no component holds an authoritative copy; the store's row becomes
//! authoritative once the consumer applies the event.

use crate::{AuditAction, EntityId, EntityKind, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: EntityId,
    pub name: String,
    pub email: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl User {
    /// Build an unsaved user. The store assigns the id on insert.
    pub fn draft(name: impl Into<String>, email: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            email: email.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A source repository owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: EntityId,
    pub user_id: EntityId,
    pub name: String,
    pub url: String,
    pub ai_enabled: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Repository {
    /// Build an unsaved repository. The store assigns the id on insert.
    pub fn draft(
        user_id: EntityId,
        name: impl Into<String>,
        url: impl Into<String>,
        ai_enabled: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            user_id,
            name: name.into(),
            url: url.into(),
            ai_enabled,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Outcome of a code review run against a repository. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewLog {
    pub id: EntityId,
    pub repository_id: EntityId,
    pub review_result: String,
    pub created_at: Timestamp,
}

impl ReviewLog {
    /// Build an unsaved review log. The store assigns the id on insert.
    pub fn draft(repository_id: EntityId, review_result: impl Into<String>) -> Self {
        Self {
            id: 0,
            repository_id,
            review_result: review_result.into(),
            created_at: Utc::now(),
        }
    }
}

/// Audit trail entry recorded after a user mutation is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLog {
    pub user_id: EntityId,
    pub user_name: String,
    pub action: AuditAction,
    pub timestamp: Timestamp,
}

impl AuditLog {
    pub fn new(user_id: EntityId, user_name: impl Into<String>, action: AuditAction) -> Self {
        Self {
            user_id,
            user_name: user_name.into(),
            action,
            timestamp: Utc::now(),
        }
    }
}

/// Entity kind of each stored type, used for cache keys and error reporting.
pub trait Kinded {
    fn kind() -> EntityKind;
}

impl Kinded for User {
    fn kind() -> EntityKind {
        EntityKind::User
    }
}

impl Kinded for Repository {
    fn kind() -> EntityKind {
        EntityKind::Repository
    }
}

impl Kinded for ReviewLog {
    fn kind() -> EntityKind {
        EntityKind::ReviewLog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_draft_has_unassigned_id() {
        let user = User::draft("Bo", "bo@x.com");
        assert_eq!(user.id, 0);
        assert_eq!(user.created_at, user.updated_at);
    }

    #[test]
    fn test_repository_snapshot_field_names() {
        let repo = Repository::draft(3, "crate", "https://example.com/crate", true);
        let value = serde_json::to_value(&repo).unwrap();
        assert_eq!(value["user_id"], 3);
        assert_eq!(value["ai_enabled"], true);
        assert_eq!(value["url"], "https://example.com/crate");
    }

    #[test]
    fn test_kinded() {
        assert_eq!(User::kind(), EntityKind::User);
        assert_eq!(Repository::kind(), EntityKind::Repository);
        assert_eq!(ReviewLog::kind(), EntityKind::ReviewLog);
    }
}

//! User usecases.

use super::{required, WriteDispatcher};
use crate::cached_store::CachedStore;
use crudstream_core::{
    AuditLog, CrudResult, DomainEvent, EntityId, User, UserChanges, UserEvent, ValidationError,
};

#[derive(Clone)]
pub struct UserService {
    reader: CachedStore,
    writes: WriteDispatcher,
}

impl UserService {
    pub fn new(reader: CachedStore, writes: WriteDispatcher) -> Self {
        Self { reader, writes }
    }

    /// Queue a `user.created` event. Fails if the email is already taken.
    pub async fn create(&self, name: &str, email: &str) -> CrudResult<()> {
        let changes = UserChanges {
            name: required("name", name)?,
            email: required("email", email)?,
        };
        if self.reader.find_user_by_email(&changes.email).await?.is_some() {
            return Err(ValidationError::EmailInUse {
                email: changes.email,
            }
            .into());
        }

        tracing::info!(email = %changes.email, "Queueing user creation");
        self.writes
            .dispatch(DomainEvent::User(UserEvent::Created(changes)));
        Ok(())
    }

    pub async fn get(&self, id: EntityId) -> CrudResult<User> {
        self.reader.get_user(id).await
    }

    pub async fn list(&self) -> CrudResult<Vec<User>> {
        self.reader.list_users().await
    }

    /// Queue a `user.updated` event for an existing user.
    pub async fn update(&self, id: EntityId, name: &str, email: &str) -> CrudResult<()> {
        let changes = UserChanges {
            name: required("name", name)?,
            email: required("email", email)?,
        };
        self.reader.get_user(id).await?;

        if let Some(other) = self.reader.find_user_by_email(&changes.email).await? {
            if other.id != id {
                return Err(ValidationError::EmailInUse {
                    email: changes.email,
                }
                .into());
            }
        }

        self.writes
            .dispatch(DomainEvent::User(UserEvent::Updated { id, changes }));
        Ok(())
    }

    /// Queue a `user.deleted` event for an existing user.
    pub async fn delete(&self, id: EntityId) -> CrudResult<()> {
        self.reader.get_user(id).await?;
        self.writes
            .dispatch(DomainEvent::User(UserEvent::Deleted { id }));
        Ok(())
    }

    /// Audit trail recorded by the consumer for `user_id`.
    pub async fn audit_logs(&self, user_id: EntityId) -> CrudResult<Vec<AuditLog>> {
        self.reader.list_audit_logs_for_user(user_id).await
    }
}

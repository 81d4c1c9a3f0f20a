//! Repository usecases.

use super::{required, WriteDispatcher};
use crate::cached_store::CachedStore;
use crudstream_core::{
    CrudResult, DomainEvent, EntityId, Repository, RepositoryChanges, RepositoryEvent,
};

#[derive(Clone)]
pub struct RepositoryService {
    reader: CachedStore,
    writes: WriteDispatcher,
}

impl RepositoryService {
    pub fn new(reader: CachedStore, writes: WriteDispatcher) -> Self {
        Self { reader, writes }
    }

    /// Queue a `repository.created` event owned by an existing user.
    pub async fn create(
        &self,
        user_id: EntityId,
        name: &str,
        url: &str,
        ai_enabled: bool,
    ) -> CrudResult<()> {
        let changes = RepositoryChanges {
            name: required("name", name)?,
            url: required("url", url)?,
            ai_enabled,
        };
        self.reader.get_user(user_id).await?;

        tracing::info!(user_id, name = %changes.name, "Queueing repository creation");
        self.writes
            .dispatch(DomainEvent::Repository(RepositoryEvent::Created {
                user_id,
                changes,
            }));
        Ok(())
    }

    pub async fn get(&self, id: EntityId) -> CrudResult<Repository> {
        self.reader.get_repository(id).await
    }

    pub async fn list(&self) -> CrudResult<Vec<Repository>> {
        self.reader.list_repositories().await
    }

    pub async fn list_for_user(&self, user_id: EntityId) -> CrudResult<Vec<Repository>> {
        self.reader.list_repositories_for_user(user_id).await
    }

    pub async fn update(
        &self,
        id: EntityId,
        name: &str,
        url: &str,
        ai_enabled: bool,
    ) -> CrudResult<()> {
        let changes = RepositoryChanges {
            name: required("name", name)?,
            url: required("url", url)?,
            ai_enabled,
        };
        self.reader.get_repository(id).await?;
        self.writes
            .dispatch(DomainEvent::Repository(RepositoryEvent::Updated { id, changes }));
        Ok(())
    }

    pub async fn delete(&self, id: EntityId) -> CrudResult<()> {
        self.reader.get_repository(id).await?;
        self.writes
            .dispatch(DomainEvent::Repository(RepositoryEvent::Deleted { id }));
        Ok(())
    }
}

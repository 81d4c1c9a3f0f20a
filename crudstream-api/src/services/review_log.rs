//! Review log usecases. Review logs are append-only.

use super::{required, WriteDispatcher};
use crate::cached_store::CachedStore;
use crudstream_core::{CrudResult, DomainEvent, EntityId, ReviewLog, ReviewLogEvent};

#[derive(Clone)]
pub struct ReviewLogService {
    reader: CachedStore,
    writes: WriteDispatcher,
}

impl ReviewLogService {
    pub fn new(reader: CachedStore, writes: WriteDispatcher) -> Self {
        Self { reader, writes }
    }

    /// Queue a `review_log.created` event for an existing repository.
    pub async fn create(&self, repository_id: EntityId, review_result: &str) -> CrudResult<()> {
        let review_result = required("review_result", review_result)?;
        self.reader.get_repository(repository_id).await?;

        self.writes
            .dispatch(DomainEvent::ReviewLog(ReviewLogEvent::Created {
                repository_id,
                review_result,
            }));
        Ok(())
    }

    pub async fn get(&self, id: EntityId) -> CrudResult<ReviewLog> {
        self.reader.get_review_log(id).await
    }

    pub async fn list_for_repository(&self, repository_id: EntityId) -> CrudResult<Vec<ReviewLog>> {
        self.reader.list_review_logs_for_repository(repository_id).await
    }
}

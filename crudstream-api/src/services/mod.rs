//! Write and read usecases, one service per entity kind.
//!
//! Reads go through the [`CachedStore`]. Writes check what they need to
//! (existence, uniqueness) and then hand the event to the
//! [`WriteDispatcher`], which publishes it in a tracked background task and
//! returns immediately. The store is not mutated until the consumer applies
//! the event.

mod repository;
mod review_log;
mod user;

pub use repository::RepositoryService;
pub use review_log::ReviewLogService;
pub use user::UserService;

use crate::invalidator::CacheInvalidator;
use crate::tasks::TaskTracker;
use crudstream_core::{CrudResult, DomainEvent, ValidationError};
use crudstream_events::CommandPublisher;

/// Fire-and-forget publishing for write usecases.
#[derive(Clone)]
pub struct WriteDispatcher {
    publisher: CommandPublisher,
    invalidator: CacheInvalidator,
    tasks: TaskTracker,
}

impl WriteDispatcher {
    pub fn new(publisher: CommandPublisher, invalidator: CacheInvalidator, tasks: TaskTracker) -> Self {
        Self {
            publisher,
            invalidator,
            tasks,
        }
    }

    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// Publish `event` without waiting. Once the broker accepts an event
    /// for an existing id, that id's cache entry is dropped.
    pub fn dispatch(&self, event: DomainEvent) {
        let publisher = self.publisher.clone();
        let invalidator = self.invalidator.clone();
        let label = event.event_type().as_str();

        self.tasks.spawn(label, async move {
            if let Err(e) = publisher.publish_event(&event).await {
                tracing::error!(
                    event_type = %event.event_type(),
                    entity_id = ?event.entity_id(),
                    error = %e,
                    "Failed to publish event"
                );
                return;
            }
            if let Some(id) = event.entity_id() {
                invalidator.invalidate(event.kind(), id).await;
            }
        });
    }
}

/// Trimmed value of a required text field.
pub(crate) fn required(field: &str, value: &str) -> CrudResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        }
        .into());
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crudstream_core::CrudError;

    #[test]
    fn test_required_trims() {
        assert_eq!(required("name", "  Bo ").unwrap(), "Bo");
    }

    #[test]
    fn test_required_rejects_blank() {
        let err = required("email", "   ").unwrap_err();
        assert!(matches!(
            err,
            CrudError::Validation(ValidationError::RequiredFieldMissing { ref field }) if field == "email"
        ));
    }
}

//! Stream naming per entity kind.

use crudstream_core::EntityKind;

/// One stream per entity kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRoutes {
    user: String,
    repository: String,
    review_log: String,
}

impl StreamRoutes {
    pub fn new(
        user: impl Into<String>,
        repository: impl Into<String>,
        review_log: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            repository: repository.into(),
            review_log: review_log.into(),
        }
    }

    pub fn stream_for(&self, kind: EntityKind) -> &str {
        match kind {
            EntityKind::User => &self.user,
            EntityKind::Repository => &self.repository,
            EntityKind::ReviewLog => &self.review_log,
        }
    }

    /// Resolve the entity kind a stream carries.
    pub fn kind_for(&self, stream: &str) -> Option<EntityKind> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| self.stream_for(*kind) == stream)
    }

    pub fn streams(&self) -> Vec<String> {
        EntityKind::ALL
            .into_iter()
            .map(|kind| self.stream_for(kind).to_string())
            .collect()
    }
}

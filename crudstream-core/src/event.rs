//! Event envelope and typed domain events.
//!
//! Every write intent travels through the message stream as an
//! [`EventEnvelope`]: a JSON object whose `event` member names the type tag
//! (e.g. `"user.created"`), with an optional integer `id` and the entity's
//! fields flattened alongside. The type tag is also duplicated in the
//! [`EVENT_TYPE_HEADER`] message header so the broker can filter on it.
//!
//! The set of type tags is closed. [`DomainEvent`] is the decoded form used
//! by the consumer: one variant per entity kind, each a closed union of the
//! mutations that kind supports, so dispatch is an exhaustive `match`.

use crate::{
    CrudError, CrudResult, EntityId, EntityKind, EventAction, MalformedError, RoutingError,
    Timestamp,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Message header that duplicates the envelope's type tag.
pub const EVENT_TYPE_HEADER: &str = "eventType";

/// Envelope members that entity fields may not reuse.
pub const RESERVED_FIELDS: [&str; 4] = ["event", "event_id", "id", "timestamp"];

// ============================================================================
// EVENT TYPE
// ============================================================================

/// Closed set of event type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    UserCreated,
    UserUpdated,
    UserDeleted,
    RepositoryCreated,
    RepositoryUpdated,
    RepositoryDeleted,
    ReviewLogCreated,
}

impl EventType {
    pub const ALL: [EventType; 7] = [
        EventType::UserCreated,
        EventType::UserUpdated,
        EventType::UserDeleted,
        EventType::RepositoryCreated,
        EventType::RepositoryUpdated,
        EventType::RepositoryDeleted,
        EventType::ReviewLogCreated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UserCreated => "user.created",
            EventType::UserUpdated => "user.updated",
            EventType::UserDeleted => "user.deleted",
            EventType::RepositoryCreated => "repository.created",
            EventType::RepositoryUpdated => "repository.updated",
            EventType::RepositoryDeleted => "repository.deleted",
            EventType::ReviewLogCreated => "review_log.created",
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            EventType::UserCreated | EventType::UserUpdated | EventType::UserDeleted => {
                EntityKind::User
            }
            EventType::RepositoryCreated
            | EventType::RepositoryUpdated
            | EventType::RepositoryDeleted => EntityKind::Repository,
            EventType::ReviewLogCreated => EntityKind::ReviewLog,
        }
    }

    pub fn action(&self) -> EventAction {
        match self {
            EventType::UserCreated | EventType::RepositoryCreated | EventType::ReviewLogCreated => {
                EventAction::Created
            }
            EventType::UserUpdated | EventType::RepositoryUpdated => EventAction::Updated,
            EventType::UserDeleted | EventType::RepositoryDeleted => EventAction::Deleted,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| RoutingError::UnknownEventType {
                event_type: s.to_string(),
            })
    }
}

// ============================================================================
// ENVELOPE
// ============================================================================

/// Serialized description of one intended mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Type tag, e.g. `"repository.updated"`.
    #[serde(rename = "event")]
    pub event_type: String,
    /// Unique per published envelope; redeliveries carry the same value.
    #[serde(default = "Uuid::now_v7")]
    pub event_id: Uuid,
    /// Target entity for updates and deletes. Ignored for creates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    #[serde(default = "Utc::now")]
    pub timestamp: Timestamp,
    /// Entity-specific fields (`name`, `email`, `url`, `ai_enabled`, ...).
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl EventEnvelope {
    /// Build an envelope. An integer `id` member in `fields` is lifted into
    /// the envelope's `id`.
    pub fn new(event_type: impl Into<String>, mut fields: Map<String, Value>) -> Self {
        let id = match fields.get("id").and_then(Value::as_i64) {
            Some(id) => {
                fields.remove("id");
                Some(id)
            }
            None => None,
        };
        Self {
            event_type: event_type.into(),
            event_id: Uuid::now_v7(),
            id,
            timestamp: Utc::now(),
            fields,
        }
    }

    pub fn with_entity_id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    /// Encode the wire body. Fails if a field shadows an envelope member,
    /// since the body would then carry a duplicate key no consumer accepts.
    pub fn to_bytes(&self) -> CrudResult<Vec<u8>> {
        if let Some(reserved) = RESERVED_FIELDS
            .iter()
            .find(|name| self.fields.contains_key(**name))
        {
            return Err(CrudError::Serialization {
                reason: format!(
                    "field '{}' of {} is reserved by the envelope",
                    reserved, self.event_type
                ),
            });
        }
        serde_json::to_vec(self).map_err(CrudError::from)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, MalformedError> {
        serde_json::from_slice(bytes).map_err(|e| MalformedError::InvalidJson {
            context: "event envelope".to_string(),
            reason: e.to_string(),
        })
    }

    /// Resolve the type tag against the closed set.
    pub fn parsed_type(&self) -> Result<EventType, RoutingError> {
        self.event_type.parse()
    }

    pub fn require_id(&self) -> Result<EntityId, MalformedError> {
        self.id.ok_or_else(|| self.missing("id"))
    }

    pub fn require_str(&self, field: &str) -> Result<String, MalformedError> {
        match self.fields.get(field) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(self.invalid(field, format!("expected string, got {}", other))),
            None => Err(self.missing(field)),
        }
    }

    pub fn require_i64(&self, field: &str) -> Result<i64, MalformedError> {
        match self.fields.get(field) {
            Some(value) => value
                .as_i64()
                .ok_or_else(|| self.invalid(field, format!("expected integer, got {}", value))),
            None => Err(self.missing(field)),
        }
    }

    /// Boolean field that falls back to `default` when absent.
    pub fn bool_or(&self, field: &str, default: bool) -> Result<bool, MalformedError> {
        match self.fields.get(field) {
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::Null) | None => Ok(default),
            Some(other) => Err(self.invalid(field, format!("expected boolean, got {}", other))),
        }
    }

    fn missing(&self, field: &str) -> MalformedError {
        MalformedError::MissingField {
            event_type: self.event_type.clone(),
            field: field.to_string(),
        }
    }

    fn invalid(&self, field: &str, reason: String) -> MalformedError {
        MalformedError::InvalidField {
            event_type: self.event_type.clone(),
            field: field.to_string(),
            reason,
        }
    }
}

// ============================================================================
// TYPED EVENTS
// ============================================================================

/// Mutable user fields. Updates overwrite all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserChanges {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserEvent {
    Created(UserChanges),
    Updated { id: EntityId, changes: UserChanges },
    Deleted { id: EntityId },
}

/// Mutable repository fields. Updates overwrite all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryChanges {
    pub name: String,
    pub url: String,
    pub ai_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryEvent {
    Created {
        user_id: EntityId,
        changes: RepositoryChanges,
    },
    Updated {
        id: EntityId,
        changes: RepositoryChanges,
    },
    Deleted {
        id: EntityId,
    },
}

/// Review logs are append-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewLogEvent {
    Created {
        repository_id: EntityId,
        review_result: String,
    },
}

/// Decoded event, one variant per entity kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    User(UserEvent),
    Repository(RepositoryEvent),
    ReviewLog(ReviewLogEvent),
}

impl DomainEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            DomainEvent::User(UserEvent::Created(_)) => EventType::UserCreated,
            DomainEvent::User(UserEvent::Updated { .. }) => EventType::UserUpdated,
            DomainEvent::User(UserEvent::Deleted { .. }) => EventType::UserDeleted,
            DomainEvent::Repository(RepositoryEvent::Created { .. }) => {
                EventType::RepositoryCreated
            }
            DomainEvent::Repository(RepositoryEvent::Updated { .. }) => {
                EventType::RepositoryUpdated
            }
            DomainEvent::Repository(RepositoryEvent::Deleted { .. }) => {
                EventType::RepositoryDeleted
            }
            DomainEvent::ReviewLog(ReviewLogEvent::Created { .. }) => EventType::ReviewLogCreated,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.event_type().kind()
    }

    /// Entity targeted by an update or delete.
    pub fn entity_id(&self) -> Option<EntityId> {
        match self {
            DomainEvent::User(UserEvent::Updated { id, .. })
            | DomainEvent::User(UserEvent::Deleted { id })
            | DomainEvent::Repository(RepositoryEvent::Updated { id, .. })
            | DomainEvent::Repository(RepositoryEvent::Deleted { id }) => Some(*id),
            _ => None,
        }
    }

    /// Entity fields as they appear on the wire, excluding `event` and `id`.
    pub fn fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        match self {
            DomainEvent::User(UserEvent::Created(changes))
            | DomainEvent::User(UserEvent::Updated { changes, .. }) => {
                fields.insert("name".into(), Value::from(changes.name.clone()));
                fields.insert("email".into(), Value::from(changes.email.clone()));
            }
            DomainEvent::Repository(RepositoryEvent::Created { user_id, changes }) => {
                fields.insert("user_id".into(), Value::from(*user_id));
                insert_repository_changes(&mut fields, changes);
            }
            DomainEvent::Repository(RepositoryEvent::Updated { changes, .. }) => {
                insert_repository_changes(&mut fields, changes);
            }
            DomainEvent::User(UserEvent::Deleted { .. })
            | DomainEvent::Repository(RepositoryEvent::Deleted { .. }) => {}
            DomainEvent::ReviewLog(ReviewLogEvent::Created {
                repository_id,
                review_result,
            }) => {
                fields.insert("repository_id".into(), Value::from(*repository_id));
                fields.insert("review_result".into(), Value::from(review_result.clone()));
            }
        }
        fields
    }

    pub fn to_envelope(&self) -> EventEnvelope {
        let envelope = EventEnvelope::new(self.event_type().as_str(), self.fields());
        match self.entity_id() {
            Some(id) => envelope.with_entity_id(id),
            None => envelope,
        }
    }
}

fn insert_repository_changes(fields: &mut Map<String, Value>, changes: &RepositoryChanges) {
    fields.insert("name".into(), Value::from(changes.name.clone()));
    fields.insert("url".into(), Value::from(changes.url.clone()));
    fields.insert("ai_enabled".into(), Value::from(changes.ai_enabled));
}

impl TryFrom<&EventEnvelope> for DomainEvent {
    type Error = CrudError;

    fn try_from(envelope: &EventEnvelope) -> Result<Self, Self::Error> {
        let event = match envelope.parsed_type()? {
            EventType::UserCreated => DomainEvent::User(UserEvent::Created(user_changes(envelope)?)),
            EventType::UserUpdated => DomainEvent::User(UserEvent::Updated {
                id: envelope.require_id()?,
                changes: user_changes(envelope)?,
            }),
            EventType::UserDeleted => DomainEvent::User(UserEvent::Deleted {
                id: envelope.require_id()?,
            }),
            EventType::RepositoryCreated => DomainEvent::Repository(RepositoryEvent::Created {
                user_id: envelope.require_i64("user_id")?,
                changes: repository_changes(envelope)?,
            }),
            EventType::RepositoryUpdated => DomainEvent::Repository(RepositoryEvent::Updated {
                id: envelope.require_id()?,
                changes: repository_changes(envelope)?,
            }),
            EventType::RepositoryDeleted => DomainEvent::Repository(RepositoryEvent::Deleted {
                id: envelope.require_id()?,
            }),
            EventType::ReviewLogCreated => DomainEvent::ReviewLog(ReviewLogEvent::Created {
                repository_id: envelope.require_i64("repository_id")?,
                review_result: envelope.require_str("review_result")?,
            }),
        };
        Ok(event)
    }
}

fn user_changes(envelope: &EventEnvelope) -> Result<UserChanges, MalformedError> {
    Ok(UserChanges {
        name: envelope.require_str("name")?,
        email: envelope.require_str("email")?,
    })
}

fn repository_changes(envelope: &EventEnvelope) -> Result<RepositoryChanges, MalformedError> {
    Ok(RepositoryChanges {
        name: envelope.require_str("name")?,
        url: envelope.require_str("url")?,
        ai_enabled: envelope.bool_or("ai_enabled", false)?,
    })
}

//! crudstream Core - Entity Types
//!
//! Pure data structures shared by every other crate: the three entity kinds,
//! the event envelope that carries write intents through the message stream,
//! circuit and health types, and the error taxonomy.
//! This crate performs no I/O.

use chrono::{DateTime, Utc};

pub mod entities;
pub mod enums;
pub mod error;
pub mod event;
pub mod health;

pub use entities::{AuditLog, Kinded, Repository, ReviewLog, User};
pub use enums::{AuditAction, CircuitState, CircuitStateParseError, EntityKind, EventAction};
pub use error::{
    ConfigError, CrudError, CrudResult, DependencyError, MalformedError, RoutingError,
    StorageError, ValidationError,
};
pub use event::{
    DomainEvent, EventEnvelope, EventType, RepositoryChanges, RepositoryEvent, ReviewLogEvent,
    UserChanges, UserEvent, EVENT_TYPE_HEADER, RESERVED_FIELDS,
};
pub use health::{HealthCheck, HealthReport, HealthStatus};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Integer identifier assigned by the durable store.
pub type EntityId = i64;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

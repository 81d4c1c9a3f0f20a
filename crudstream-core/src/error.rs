//! Error types for crudstream operations
//!
//! The taxonomy the coordination layer reasons about:
//!
//! - [`DependencyError`]: a guarded dependency is unavailable, either because
//!   its circuit is open or because the underlying call failed.
//! - [`CrudError::NotFound`]: no row exists for the requested id.
//! - [`MalformedError`]: a cached value or inbound event could not be decoded.
//! - [`RoutingError`]: an event names an unknown type or arrives on an
//!   unknown stream.

use crate::{EntityId, EntityKind};
use thiserror::Error;

/// A guarded dependency could not serve the call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DependencyError {
    #[error("circuit {name} is open")]
    CircuitOpen { name: String },

    #[error("circuit {name} is half-open and its probe budget is exhausted")]
    ProbeLimitReached { name: String },

    #[error("call to {dependency} failed: {reason}")]
    CallFailed { dependency: String, reason: String },
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Insert failed for {kind}: {reason}")]
    InsertFailed { kind: EntityKind, reason: String },

    #[error("Update failed for {kind} with id {id}: {reason}")]
    UpdateFailed {
        kind: EntityKind,
        id: EntityId,
        reason: String,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// A payload could not be decoded into the shape it claims to have.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MalformedError {
    #[error("invalid JSON in {context}: {reason}")]
    InvalidJson { context: String, reason: String },

    #[error("event {event_type} is missing field {field}")]
    MissingField { event_type: String, field: String },

    #[error("event {event_type} has invalid field {field}: {reason}")]
    InvalidField {
        event_type: String,
        field: String,
        reason: String,
    },

    #[error("cached value under {key} is unreadable: {reason}")]
    CachedValue { key: String, reason: String },
}

/// An event could not be routed to a handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("unknown event type: {event_type}")]
    UnknownEventType { event_type: String },

    #[error("unknown stream: {stream}")]
    UnknownStream { stream: String },

    #[error("event {event_type} does not belong on stream {stream}")]
    KindMismatch { stream: String, event_type: String },
}

/// Caller-side validation failures raised before an intent is published.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("email already in use: {email}")]
    EmailInUse { email: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all crudstream errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CrudError {
    #[error("Dependency unavailable: {0}")]
    Unavailable(#[from] DependencyError),

    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: EntityId },

    #[error("Malformed payload: {0}")]
    Malformed(#[from] MalformedError),

    #[error("Unroutable event: {0}")]
    Unroutable(#[from] RoutingError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },
}

impl CrudError {
    pub fn not_found(kind: EntityKind, id: EntityId) -> Self {
        CrudError::NotFound { kind, id }
    }

    pub fn call_failed(dependency: impl Into<String>, reason: impl ToString) -> Self {
        CrudError::Unavailable(DependencyError::CallFailed {
            dependency: dependency.into(),
            reason: reason.to_string(),
        })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, CrudError::Unavailable(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CrudError::NotFound { .. })
    }

    /// Whether this error says something about the health of the dependency
    /// that produced it. Only these count toward tripping a circuit; a missing
    /// row or a validation failure is a healthy answer.
    pub fn is_dependency_failure(&self) -> bool {
        matches!(self, CrudError::Unavailable(_) | CrudError::Storage(_))
    }
}

impl From<serde_json::Error> for CrudError {
    fn from(e: serde_json::Error) -> Self {
        CrudError::Serialization {
            reason: e.to_string(),
        }
    }
}

/// Result type alias for crudstream operations.
pub type CrudResult<T> = Result<T, CrudError>;

// =============================================================================
// TESTS
// =============================================================================

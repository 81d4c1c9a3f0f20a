//! Enum types for crudstream entities, events and circuits

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ENTITY KIND
// ============================================================================

/// Discriminator for the fixed set of domain entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Repository,
    ReviewLog,
}

impl EntityKind {
    /// All kinds, in routing order.
    pub const ALL: [EntityKind; 3] = [EntityKind::User, EntityKind::Repository, EntityKind::ReviewLog];

    /// Prefix used in cache keys and event type tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Repository => "repository",
            EntityKind::ReviewLog => "review_log",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "user" => Ok(EntityKind::User),
            "repository" => Ok(EntityKind::Repository),
            "reviewlog" => Ok(EntityKind::ReviewLog),
            _ => Err(format!("Invalid EntityKind: {}", s)),
        }
    }
}

// ============================================================================
// EVENT ACTION
// ============================================================================

/// Mutation carried by an event, the suffix of an event type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Created,
    Updated,
    Deleted,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::Created => "created",
            EventAction::Updated => "updated",
            EventAction::Deleted => "deleted",
        }
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(EventAction::Created),
            "updated" => Ok(EventAction::Updated),
            "deleted" => Ok(EventAction::Deleted),
            _ => Err(format!("Invalid EventAction: {}", s)),
        }
    }
}

/// Action recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Created,
    Updated,
    Deleted,
}

impl From<EventAction> for AuditAction {
    fn from(action: EventAction) -> Self {
        match action {
            EventAction::Created => AuditAction::Created,
            EventAction::Updated => AuditAction::Updated,
            EventAction::Deleted => AuditAction::Deleted,
        }
    }
}

// ============================================================================
// CIRCUIT STATE
// ============================================================================

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed = 0,
    /// Circuit is open, requests are rejected
    Open = 1,
    /// Circuit is half-open, a bounded number of probes are let through
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(v: u8) -> Self {
        match v {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }
}

impl CircuitState {
    /// Label used in logs and alert messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF-OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CircuitState {
    type Err = CircuitStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "closed" => Ok(Self::Closed),
            "open" => Ok(Self::Open),
            "halfopen" => Ok(Self::HalfOpen),
            _ => Err(CircuitStateParseError(s.to_string())),
        }
    }
}

/// Error parsing CircuitState from string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitStateParseError(pub String);

impl fmt::Display for CircuitStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid circuit state: {}", self.0)
    }
}

impl std::error::Error for CircuitStateParseError {}

fn normalize_token(s: &str) -> String {
    s.trim()
        .chars()
        .filter(|c| *c != '_' && *c != '-' && *c != ' ')
        .flat_map(char::to_lowercase)
        .collect()
}

//! Cache key format.

use crudstream_core::{EntityId, EntityKind};
use std::fmt;
use std::str::FromStr;

/// A cache key naming one entity snapshot, rendered as `"<kind>:<id>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    kind: EntityKind,
    id: EntityId,
}

impl CacheKey {
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self { kind, id }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn id(&self) -> EntityId {
        self.id
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// A string that is not a valid `"<kind>:<id>"` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyParseError(pub String);

impl fmt::Display for CacheKeyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid cache key: {}", self.0)
    }
}

impl std::error::Error for CacheKeyParseError {}

impl FromStr for CacheKey {
    type Err = CacheKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| CacheKeyParseError(s.to_string()))?;
        let kind = EntityKind::ALL
            .into_iter()
            .find(|k| k.as_str() == kind)
            .ok_or_else(|| CacheKeyParseError(s.to_string()))?;
        let id = id
            .parse::<EntityId>()
            .map_err(|_| CacheKeyParseError(s.to_string()))?;
        Ok(Self { kind, id })
    }
}

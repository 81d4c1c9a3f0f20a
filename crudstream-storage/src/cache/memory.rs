//! In-memory TTL cache backend.

use crate::cache::{CacheBackend, CacheKey, CacheStats};
use async_trait::async_trait;
use crudstream_core::{CrudError, CrudResult, StorageError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<CacheKey, Entry>,
    stats: CacheStats,
}

/// In-memory [`CacheBackend`]. Expired entries are dropped when read and
/// swept on every write.
///
/// Expiry uses `tokio::time`, so it follows a paused test clock.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCacheBackend {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> CrudResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| CrudError::from(StorageError::LockPoisoned))
    }

    /// Whether a live entry exists, without touching hit/miss counters.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock()
            .map(|inner| {
                inner
                    .entries
                    .get(key)
                    .is_some_and(|e| e.expires_at > Instant::now())
            })
            .unwrap_or(false)
    }

    /// Raw value under `key`, without touching hit/miss counters.
    pub fn peek(&self, key: &CacheKey) -> Option<String> {
        let inner = self.lock().ok()?;
        inner
            .entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone())
    }

    /// Remaining TTL of a live entry.
    pub fn ttl(&self, key: &CacheKey) -> Option<Duration> {
        let inner = self.lock().ok()?;
        let entry = inner.entries.get(key)?;
        entry.expires_at.checked_duration_since(Instant::now())
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &CacheKey) -> CrudResult<Option<String>> {
        let mut inner = self.lock()?;
        let now = Instant::now();
        let found = inner
            .entries
            .get(key)
            .map(|e| (e.expires_at > now, e.value.clone()));
        let live = match found {
            Some((true, value)) => Some(value),
            Some((false, _)) => {
                inner.entries.remove(key);
                inner.stats.expirations += 1;
                None
            }
            None => None,
        };
        match live {
            Some(_) => inner.stats.hits += 1,
            None => inner.stats.misses += 1,
        }
        Ok(live)
    }

    async fn set_with_ttl(&self, key: &CacheKey, value: String, ttl: Duration) -> CrudResult<()> {
        let now = Instant::now();
        let mut inner = self.lock()?;
        let before = inner.entries.len();
        inner.entries.retain(|_, e| e.expires_at > now);
        let swept = (before - inner.entries.len()) as u64;
        inner.stats.expirations += swept;
        inner.entries.insert(
            *key,
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> CrudResult<()> {
        self.lock()?.entries.remove(key);
        Ok(())
    }

    async fn ping(&self) -> CrudResult<()> {
        self.lock().map(|_| ())
    }

    async fn stats(&self) -> CrudResult<CacheStats> {
        let inner = self.lock()?;
        let mut stats = inner.stats.clone();
        stats.entry_count = inner.entries.len() as u64;
        Ok(stats)
    }
}

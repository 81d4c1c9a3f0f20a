//! In-memory durable log broker.
//!
//! Each stream is an append-only log. Each consumer group keeps, per
//! stream, a delivery cursor and a committed offset. Subscribing resets
//! the delivery cursor to the committed offset, so messages handed out but
//! never committed are delivered again.

use crate::stream::{MessageStream, StreamMessage, Subscription};
use async_trait::async_trait;
use crudstream_core::{CrudError, CrudResult, StorageError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

#[derive(Debug, Default, Clone, Copy)]
struct GroupCursor {
    next: u64,
    committed: u64,
}

#[derive(Debug, Default)]
struct Broker {
    logs: HashMap<String, Vec<StreamMessage>>,
    /// group -> stream -> cursor
    groups: HashMap<String, HashMap<String, GroupCursor>>,
}

/// In-memory [`MessageStream`] with consumer groups and redelivery.
///
/// Clones share the same logs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStream {
    broker: Arc<Mutex<Broker>>,
    notify: Arc<Notify>,
}

fn lock(broker: &Mutex<Broker>) -> CrudResult<MutexGuard<'_, Broker>> {
    broker
        .lock()
        .map_err(|_| CrudError::from(StorageError::LockPoisoned))
}

impl InMemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages ever appended to `stream`.
    pub fn len(&self, stream: &str) -> usize {
        lock(&self.broker)
            .map(|b| b.logs.get(stream).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, stream: &str) -> bool {
        self.len(stream) == 0
    }

    /// Snapshot of a stream's log.
    pub fn messages(&self, stream: &str) -> Vec<StreamMessage> {
        lock(&self.broker)
            .map(|b| b.logs.get(stream).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Offset `group` has committed up to on `stream`.
    pub fn committed(&self, group: &str, stream: &str) -> u64 {
        lock(&self.broker)
            .ok()
            .and_then(|b| {
                b.groups
                    .get(group)
                    .and_then(|g| g.get(stream))
                    .map(|c| c.committed)
            })
            .unwrap_or(0)
    }

    /// Move `group` back to `offset` on `stream`, so every message from
    /// there on is delivered again, including to live subscriptions.
    pub fn rewind(&self, group: &str, stream: &str, offset: u64) -> CrudResult<()> {
        {
            let mut broker = lock(&self.broker)?;
            let cursor = broker
                .groups
                .entry(group.to_string())
                .or_default()
                .entry(stream.to_string())
                .or_default();
            cursor.next = offset;
            cursor.committed = cursor.committed.min(offset);
        }
        self.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl MessageStream for InMemoryStream {
    async fn send(
        &self,
        stream: &str,
        headers: HashMap<String, String>,
        payload: Vec<u8>,
    ) -> CrudResult<u64> {
        let offset = {
            let mut broker = lock(&self.broker)?;
            let log = broker.logs.entry(stream.to_string()).or_default();
            let offset = log.len() as u64;
            log.push(StreamMessage {
                stream: stream.to_string(),
                offset,
                headers,
                payload,
            });
            offset
        };
        self.notify.notify_waiters();
        tracing::trace!(stream, offset, "Message appended");
        Ok(offset)
    }

    async fn subscribe(
        &self,
        streams: &[String],
        group: &str,
    ) -> CrudResult<Box<dyn Subscription>> {
        {
            let mut broker = lock(&self.broker)?;
            let cursors = broker.groups.entry(group.to_string()).or_default();
            for stream in streams {
                let cursor = cursors.entry(stream.clone()).or_default();
                cursor.next = cursor.committed;
            }
        }
        Ok(Box::new(InMemorySubscription {
            broker: Arc::clone(&self.broker),
            notify: Arc::clone(&self.notify),
            group: group.to_string(),
            streams: streams.to_vec(),
            start: 0,
        }))
    }
}

struct InMemorySubscription {
    broker: Arc<Mutex<Broker>>,
    notify: Arc<Notify>,
    group: String,
    streams: Vec<String>,
    /// Stream checked first on the next take; advances every call.
    start: usize,
}

impl InMemorySubscription {
    fn try_take(&mut self) -> CrudResult<Option<StreamMessage>> {
        let count = self.streams.len();
        if count == 0 {
            return Ok(None);
        }
        let first = self.start % count;
        self.start = (first + 1) % count;

        let mut guard = lock(&self.broker)?;
        let broker = &mut *guard;
        let Some(cursors) = broker.groups.get_mut(&self.group) else {
            return Ok(None);
        };
        for stream in self.streams[first..].iter().chain(&self.streams[..first]) {
            let Some(log) = broker.logs.get(stream) else {
                continue;
            };
            let cursor = cursors.entry(stream.clone()).or_default();
            if let Some(message) = log.get(cursor.next as usize) {
                cursor.next += 1;
                return Ok(Some(message.clone()));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next(&mut self) -> CrudResult<StreamMessage> {
        let notify = Arc::clone(&self.notify);
        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            // Register before checking so a send between the check and the
            // await still wakes us.
            notified.as_mut().enable();
            if let Some(message) = self.try_take()? {
                return Ok(message);
            }
            notified.await;
        }
    }

    async fn commit(&mut self, message: &StreamMessage) -> CrudResult<()> {
        let mut broker = lock(&self.broker)?;
        let cursor = broker
            .groups
            .entry(self.group.clone())
            .or_default()
            .entry(message.stream.clone())
            .or_default();
        cursor.committed = cursor.committed.max(message.offset + 1);
        Ok(())
    }
}

//! Message stream contract.
//!
//! Delivery is at-least-once: a message stays pending for its consumer
//! group until [`Subscription::commit`] moves the group past it. A group
//! that resubscribes, or is rewound, sees uncommitted messages again.

use async_trait::async_trait;
use crudstream_core::CrudResult;
use std::collections::HashMap;

/// One message read from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    pub stream: String,
    /// Position in the stream's log.
    pub offset: u64,
    pub headers: HashMap<String, String>,
    pub payload: Vec<u8>,
}

impl StreamMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// A durable, named, append-only message stream.
#[async_trait]
pub trait MessageStream: Send + Sync {
    /// Append a message and return its offset.
    async fn send(
        &self,
        stream: &str,
        headers: HashMap<String, String>,
        payload: Vec<u8>,
    ) -> CrudResult<u64>;

    /// Join `group` on the given streams. Each message is delivered to one
    /// member of the group.
    async fn subscribe(&self, streams: &[String], group: &str)
        -> CrudResult<Box<dyn Subscription>>;
}

/// A consumer group membership.
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Wait for the next message. Blocks with no timeout.
    ///
    /// Cancel safe: dropping the future before it resolves consumes nothing.
    async fn next(&mut self) -> CrudResult<StreamMessage>;

    /// Mark `message` and everything before it on its stream as processed
    /// for this group.
    async fn commit(&mut self, message: &StreamMessage) -> CrudResult<()>;
}

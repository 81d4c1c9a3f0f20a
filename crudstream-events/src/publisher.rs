//! Command publisher.
//!
//! Turns a write intent into an [`EventEnvelope`] and sends it. The
//! publisher never reads or writes the durable store; existence checks
//! belong to the caller.

use crate::routes::StreamRoutes;
use crate::stream::MessageStream;
use crudstream_core::{CrudResult, DomainEvent, EventEnvelope, EVENT_TYPE_HEADER};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct CommandPublisher {
    stream: Arc<dyn MessageStream>,
    routes: StreamRoutes,
}

impl CommandPublisher {
    pub fn new(stream: Arc<dyn MessageStream>, routes: StreamRoutes) -> Self {
        Self { stream, routes }
    }

    pub fn routes(&self) -> &StreamRoutes {
        &self.routes
    }

    /// Serialize and send one event to `stream_name`.
    ///
    /// The type tag goes in the envelope body and in the `eventType` header.
    /// Encoding and send failures are returned to the caller.
    pub async fn publish(
        &self,
        stream_name: &str,
        event_type: &str,
        fields: Map<String, Value>,
    ) -> CrudResult<()> {
        let envelope = EventEnvelope::new(event_type, fields);
        self.send_envelope(stream_name, &envelope).await
    }

    /// Publish a typed event on the stream for its kind.
    pub async fn publish_event(&self, event: &DomainEvent) -> CrudResult<()> {
        let stream_name = self.routes.stream_for(event.kind());
        self.send_envelope(stream_name, &event.to_envelope()).await
    }

    async fn send_envelope(&self, stream_name: &str, envelope: &EventEnvelope) -> CrudResult<()> {
        let payload = envelope.to_bytes()?;
        let headers = HashMap::from([(
            EVENT_TYPE_HEADER.to_string(),
            envelope.event_type.clone(),
        )]);
        let offset = self.stream.send(stream_name, headers, payload).await?;
        tracing::debug!(
            stream = stream_name,
            offset,
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            entity_id = ?envelope.id,
            "Event published"
        );
        Ok(())
    }
}

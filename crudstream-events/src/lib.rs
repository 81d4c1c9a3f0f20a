//! crudstream Events - Write Path
//!
//! The write path never touches storage synchronously. A usecase hands an
//! intent to the [`CommandPublisher`], which serializes it into an
//! [`EventEnvelope`](crudstream_core::EventEnvelope) and sends it to the
//! stream for its entity kind. An [`EventConsumer`] subscribed to those
//! streams later decodes each message and applies it to the
//! [`EntityStore`](crudstream_storage::EntityStore).
//!
//! ```text
//! intent -> CommandPublisher -> MessageStream -> EventConsumer -> EntityStore
//!                                                     |
//!                                                     +-> ApplyObserver (cache invalidation)
//! ```

mod consumer;
mod memory;
mod publisher;
mod routes;
mod stream;

pub use consumer::{
    AppliedChange, ApplyObserver, ConsumerMetrics, ConsumerSnapshot, ConsumerState, Disposition,
    EventConsumer,
};
pub use memory::InMemoryStream;
pub use publisher::CommandPublisher;
pub use routes::StreamRoutes;
pub use stream::{MessageStream, StreamMessage, Subscription};

//! Event consumer.
//!
//! Subscribes to the entity streams, decodes each message into a
//! [`DomainEvent`], and applies it to the durable store.
//!
//! # Lifecycle
//!
//! `Idle -> Subscribed -> Running -> Draining -> Stopped`
//!
//! [`EventConsumer::run`] waits on the next message and on the shutdown
//! signal at the same time, so cancellation never has to wait for traffic.
//! A message already being applied is finished before the loop exits.
//!
//! # Failure handling
//!
//! Malformed payloads, unknown event types or streams, and updates or
//! deletes of ids that do not exist are logged, counted, committed and
//! dropped: retrying them would fail the same way forever.
//!
//! A store that is down or rejects the write is different. The message is
//! left uncommitted and applied again after an exponential backoff, until it
//! goes through or shutdown is requested. An uncommitted message is
//! redelivered to the group on the next subscription. No single message can
//! stop the loop; only the shutdown signal does.
//!
//! # Ordering
//!
//! Events are applied in the order the stream delivers them. Nothing orders
//! two events for the same id beyond that, and redelivery is only safe
//! because updates overwrite every mutable field.

use crate::routes::StreamRoutes;
use crate::stream::{MessageStream, StreamMessage, Subscription};
use async_trait::async_trait;
use chrono::Utc;
use crudstream_core::{
    AuditAction, AuditLog, CrudError, CrudResult, DomainEvent, EntityId, EntityKind,
    EventAction, EventEnvelope, EventType, Repository, RepositoryEvent, ReviewLog,
    ReviewLogEvent, RoutingError, User, UserEvent,
};
use crudstream_storage::EntityStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Pause after a failed receive before trying again.
const RECEIVE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// First pause before re-applying a message the store failed on.
const APPLY_RETRY_INITIAL_DELAY: Duration = Duration::from_millis(100);

/// Upper bound on the pause between apply attempts.
const APPLY_RETRY_MAX_DELAY: Duration = Duration::from_secs(5);

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Subscribed,
    Running,
    Draining,
    Stopped,
}

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    pub received: AtomicU64,
    pub applied: AtomicU64,
    pub dropped_malformed: AtomicU64,
    pub dropped_unroutable: AtomicU64,
    pub dropped_not_found: AtomicU64,
    /// Messages dropped on an error that is neither a bad payload nor a
    /// dependency failure.
    pub failed: AtomicU64,
    /// Apply attempts that hit a dependency failure and were retried.
    pub retries: AtomicU64,
}

impl ConsumerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ConsumerSnapshot {
        ConsumerSnapshot {
            received: self.received.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            dropped_unroutable: self.dropped_unroutable.load(Ordering::Relaxed),
            dropped_not_found: self.dropped_not_found.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerSnapshot {
    pub received: u64,
    pub applied: u64,
    pub dropped_malformed: u64,
    pub dropped_unroutable: u64,
    pub dropped_not_found: u64,
    pub failed: u64,
    pub retries: u64,
}

impl ConsumerSnapshot {
    /// Messages fully handled, whatever the outcome.
    pub fn handled(&self) -> u64 {
        self.applied
            + self.dropped_malformed
            + self.dropped_unroutable
            + self.dropped_not_found
            + self.failed
    }
}

/// What to do with a message after one apply attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Applied or unprocessable: commit and move on.
    Commit,
    /// The store failed: keep the message and apply it again.
    Retry,
}

// ============================================================================
// OBSERVER
// ============================================================================

/// A mutation the consumer has durably applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedChange {
    pub event_type: EventType,
    pub kind: EntityKind,
    pub id: EntityId,
    pub action: EventAction,
}

/// Called after every successful apply. Used for cache invalidation.
#[async_trait]
pub trait ApplyObserver: Send + Sync {
    async fn on_applied(&self, change: &AppliedChange);
}

// ============================================================================
// CONSUMER
// ============================================================================

pub struct EventConsumer {
    stream: Arc<dyn MessageStream>,
    store: Arc<dyn EntityStore>,
    routes: StreamRoutes,
    group: String,
    observer: Option<Arc<dyn ApplyObserver>>,
    subscription: Option<Box<dyn Subscription>>,
    metrics: Arc<ConsumerMetrics>,
    state: watch::Sender<ConsumerState>,
}

impl EventConsumer {
    pub fn new(
        stream: Arc<dyn MessageStream>,
        store: Arc<dyn EntityStore>,
        routes: StreamRoutes,
        group: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Idle);
        Self {
            stream,
            store,
            routes,
            group: group.into(),
            observer: None,
            subscription: None,
            metrics: Arc::new(ConsumerMetrics::new()),
            state,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ApplyObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn metrics(&self) -> Arc<ConsumerMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions from another task.
    pub fn state_receiver(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Join the consumer group on every entity stream.
    pub async fn subscribe(&mut self) -> CrudResult<()> {
        if self.subscription.is_some() {
            return Ok(());
        }
        let streams = self.routes.streams();
        let subscription = self.stream.subscribe(&streams, &self.group).await?;
        self.subscription = Some(subscription);
        self.state.send_replace(ConsumerState::Subscribed);
        tracing::info!(group = %self.group, streams = ?streams, "Consumer subscribed");
        Ok(())
    }

    /// Consume until `shutdown_rx` turns true or its sender is dropped.
    ///
    /// Subscribes first if [`subscribe`](Self::subscribe) was not called.
    pub async fn run(
        mut self,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> CrudResult<Arc<ConsumerMetrics>> {
        self.subscribe().await?;
        let Some(mut subscription) = self.subscription.take() else {
            return Ok(self.metrics);
        };

        self.state.send_replace(ConsumerState::Running);
        tracing::info!(group = %self.group, "Consumer started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }

                received = subscription.next() => {
                    match received {
                        Ok(message) => {
                            self.metrics.received.fetch_add(1, Ordering::Relaxed);
                            if !self.apply_until_settled(&message, &mut shutdown_rx).await {
                                tracing::info!(
                                    stream = %message.stream,
                                    offset = message.offset,
                                    "Leaving message uncommitted for redelivery"
                                );
                                break;
                            }
                            if let Err(e) = subscription.commit(&message).await {
                                tracing::error!(
                                    error = %e,
                                    stream = %message.stream,
                                    offset = message.offset,
                                    "Failed to commit message"
                                );
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, group = %self.group, "Failed to receive message");
                            tokio::time::sleep(RECEIVE_RETRY_DELAY).await;
                        }
                    }
                }
            }
        }

        self.state.send_replace(ConsumerState::Draining);
        tracing::info!(group = %self.group, "Consumer draining");
        drop(subscription);

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            group = %self.group,
            received = snapshot.received,
            applied = snapshot.applied,
            dropped_malformed = snapshot.dropped_malformed,
            dropped_unroutable = snapshot.dropped_unroutable,
            dropped_not_found = snapshot.dropped_not_found,
            failed = snapshot.failed,
            retries = snapshot.retries,
            "Consumer stopped"
        );
        self.state.send_replace(ConsumerState::Stopped);

        Ok(self.metrics)
    }

    /// Apply `message` until it is settled, backing off between attempts
    /// that hit a dependency failure. Returns false if shutdown arrived
    /// first, in which case the message must not be committed.
    async fn apply_until_settled(
        &self,
        message: &StreamMessage,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        let mut delay = APPLY_RETRY_INITIAL_DELAY;
        loop {
            if self.handle_message(message).await == Disposition::Commit {
                return true;
            }
            self.metrics.retries.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                stream = %message.stream,
                offset = message.offset,
                retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Store unavailable, retrying event"
            );

            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        return false;
                    }
                }

                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(APPLY_RETRY_MAX_DELAY);
        }
    }

    /// Decode and apply one message once. The outcome is logged and
    /// counted; a dependency failure asks for a retry instead of a commit.
    pub async fn handle_message(&self, message: &StreamMessage) -> Disposition {
        let result = match self.decode(message) {
            Ok(event) => self.apply(&event).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(change) => {
                self.metrics.applied.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    event_type = %change.event_type,
                    kind = %change.kind,
                    id = change.id,
                    "Event applied"
                );
                if let Some(observer) = &self.observer {
                    observer.on_applied(&change).await;
                }
                Disposition::Commit
            }
            Err(e) if e.is_dependency_failure() => {
                tracing::error!(
                    error = %e,
                    stream = %message.stream,
                    offset = message.offset,
                    "Failed to apply event"
                );
                Disposition::Retry
            }
            Err(e) => {
                self.record_drop(message, &e);
                Disposition::Commit
            }
        }
    }

    fn record_drop(&self, message: &StreamMessage, error: &CrudError) {
        let counter = match error {
            CrudError::Malformed(_) => &self.metrics.dropped_malformed,
            CrudError::Unroutable(_) => &self.metrics.dropped_unroutable,
            CrudError::NotFound { .. } => &self.metrics.dropped_not_found,
            _ => &self.metrics.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        tracing::warn!(
            error = %error,
            stream = %message.stream,
            offset = message.offset,
            "Dropping unprocessable event"
        );
    }

    fn decode(&self, message: &StreamMessage) -> CrudResult<DomainEvent> {
        let kind = self
            .routes
            .kind_for(&message.stream)
            .ok_or_else(|| RoutingError::UnknownStream {
                stream: message.stream.clone(),
            })?;
        let envelope = EventEnvelope::from_slice(&message.payload)?;
        let event = DomainEvent::try_from(&envelope)?;
        if event.kind() != kind {
            return Err(RoutingError::KindMismatch {
                stream: message.stream.clone(),
                event_type: envelope.event_type,
            }
            .into());
        }
        Ok(event)
    }

    /// Apply a decoded event to the store.
    pub async fn apply(&self, event: &DomainEvent) -> CrudResult<AppliedChange> {
        let event_type = event.event_type();
        let id = match event {
            DomainEvent::User(e) => self.apply_user(e).await?,
            DomainEvent::Repository(e) => self.apply_repository(e).await?,
            DomainEvent::ReviewLog(e) => self.apply_review_log(e).await?,
        };
        Ok(AppliedChange {
            event_type,
            kind: event_type.kind(),
            id,
            action: event_type.action(),
        })
    }

    async fn apply_user(&self, event: &UserEvent) -> CrudResult<EntityId> {
        let (user, action) = match event {
            UserEvent::Created(changes) => {
                let user = self
                    .store
                    .user_insert(&User::draft(&changes.name, &changes.email))
                    .await?;
                (user, AuditAction::Created)
            }
            UserEvent::Updated { id, changes } => {
                let mut user = self
                    .store
                    .user_get(*id)
                    .await?
                    .ok_or_else(|| CrudError::not_found(EntityKind::User, *id))?;
                user.name = changes.name.clone();
                user.email = changes.email.clone();
                user.updated_at = Utc::now();
                self.store.user_update(&user).await?;
                (user, AuditAction::Updated)
            }
            UserEvent::Deleted { id } => {
                let user = self
                    .store
                    .user_get(*id)
                    .await?
                    .ok_or_else(|| CrudError::not_found(EntityKind::User, *id))?;
                self.store.user_delete(*id).await?;
                (user, AuditAction::Deleted)
            }
        };

        let entry = AuditLog::new(user.id, &user.name, action);
        if let Err(e) = self.store.audit_log_append(&entry).await {
            tracing::warn!(error = %e, user_id = user.id, "Failed to record audit log");
        }
        Ok(user.id)
    }

    async fn apply_repository(&self, event: &RepositoryEvent) -> CrudResult<EntityId> {
        match event {
            RepositoryEvent::Created { user_id, changes } => {
                let draft =
                    Repository::draft(*user_id, &changes.name, &changes.url, changes.ai_enabled);
                Ok(self.store.repository_insert(&draft).await?.id)
            }
            RepositoryEvent::Updated { id, changes } => {
                let mut repository = self
                    .store
                    .repository_get(*id)
                    .await?
                    .ok_or_else(|| CrudError::not_found(EntityKind::Repository, *id))?;
                repository.name = changes.name.clone();
                repository.url = changes.url.clone();
                repository.ai_enabled = changes.ai_enabled;
                repository.updated_at = Utc::now();
                self.store.repository_update(&repository).await?;
                Ok(*id)
            }
            RepositoryEvent::Deleted { id } => {
                self.store.repository_delete(*id).await?;
                Ok(*id)
            }
        }
    }

    async fn apply_review_log(&self, event: &ReviewLogEvent) -> CrudResult<EntityId> {
        match event {
            ReviewLogEvent::Created {
                repository_id,
                review_result,
            } => {
                let draft = ReviewLog::draft(*repository_id, review_result);
                Ok(self.store.review_log_insert(&draft).await?.id)
            }
        }
    }
}

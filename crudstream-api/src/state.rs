//! Shared application state.
//!
//! Everything a usecase touches is built here once and shared: one breaker
//! per dependency, the cache-aside reader, the invalidator, the publisher
//! and the task tracker. Nothing is process-global; tests build their own.

use std::sync::Arc;

use crudstream_core::CrudResult;
use crudstream_events::{CommandPublisher, EventConsumer, MessageStream};
use crudstream_storage::{CacheBackend, EntityStore};

use crate::cached_store::CachedStore;
use crate::config::AppConfig;
use crate::constants::{CACHE_DEPENDENCY, STORAGE_DEPENDENCY};
use crate::health::HealthService;
use crate::invalidator::CacheInvalidator;
use crate::resilience::{AlertSender, CircuitBreakerRegistry};
use crate::services::{RepositoryService, ReviewLogService, UserService, WriteDispatcher};
use crate::tasks::{ShutdownReport, TaskTracker};

/// Application-wide state shared by every usecase.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub breakers: Arc<CircuitBreakerRegistry>,
    /// Cache-aside reads, each store behind its own breaker.
    pub reader: CachedStore,
    pub invalidator: CacheInvalidator,
    pub publisher: CommandPublisher,
    /// Fire-and-forget publish tasks awaited on shutdown.
    pub tasks: TaskTracker,
    pub users: UserService,
    pub repositories: RepositoryService,
    pub review_logs: ReviewLogService,
    pub health: HealthService,
    store: Arc<dyn EntityStore>,
    stream: Arc<dyn MessageStream>,
}

impl AppState {
    pub async fn new(
        config: AppConfig,
        store: Arc<dyn EntityStore>,
        cache: Arc<dyn CacheBackend>,
        stream: Arc<dyn MessageStream>,
        alerts: Option<AlertSender>,
    ) -> CrudResult<Self> {
        config.validate()?;

        let registry = CircuitBreakerRegistry::new(config.circuit.clone());
        let registry = match alerts {
            Some(alerts) => registry.with_alerts(alerts),
            None => registry,
        };
        let breakers = Arc::new(registry);
        let store_breaker = breakers.get_or_create(STORAGE_DEPENDENCY).await;
        let cache_breaker = breakers.get_or_create(CACHE_DEPENDENCY).await;

        let reader = CachedStore::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&store_breaker),
            Arc::clone(&cache_breaker),
            config.cache.entry_ttl,
        );
        let invalidator = CacheInvalidator::new(Arc::clone(&cache), Arc::clone(&cache_breaker));
        let publisher = CommandPublisher::new(Arc::clone(&stream), config.streams.routes());
        let tasks = TaskTracker::new();
        let writes = WriteDispatcher::new(publisher.clone(), invalidator.clone(), tasks.clone());

        let health = HealthService::new(
            Arc::clone(&store),
            cache,
            store_breaker,
            cache_breaker,
        );

        Ok(Self {
            users: UserService::new(reader.clone(), writes.clone()),
            repositories: RepositoryService::new(reader.clone(), writes.clone()),
            review_logs: ReviewLogService::new(reader.clone(), writes),
            config,
            breakers,
            reader,
            invalidator,
            publisher,
            tasks,
            health,
            store,
            stream,
        })
    }

    /// A consumer on every entity stream that invalidates the cache after
    /// each applied change.
    pub fn consumer(&self) -> EventConsumer {
        EventConsumer::new(
            Arc::clone(&self.stream),
            Arc::clone(&self.store),
            self.config.streams.routes(),
            self.config.streams.consumer_group.clone(),
        )
        .with_observer(Arc::new(self.invalidator.clone()))
    }

    /// Wait for background tasks using the configured poll interval and
    /// drain timeout.
    pub async fn drain_tasks(&self) -> ShutdownReport {
        let shutdown = &self.config.shutdown;
        self.tasks
            .shutdown(shutdown.poll_interval, shutdown.drain_timeout)
            .await
    }
}

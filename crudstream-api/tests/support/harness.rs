use async_trait::async_trait;
use crudstream_api::{alert_channel, AlertNotifier, AppConfig, AppState, StateChange};
use crudstream_core::{CrudResult, EntityId, EntityKind};
use crudstream_events::ConsumerSnapshot;
use crudstream_storage::{CacheKey, InMemoryStorage};
use crudstream_test_utils::{FlakyCache, FlakyStorage, InMemoryCacheBackend, InMemoryStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Records every state change it is handed.
#[derive(Default)]
pub struct RecordingNotifier {
    changes: Mutex<Vec<StateChange>>,
}

impl RecordingNotifier {
    pub fn changes(&self) -> Vec<StateChange> {
        self.changes.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.changes().iter().map(StateChange::message).collect()
    }
}

#[async_trait]
impl AlertNotifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify(&self, change: &StateChange) -> CrudResult<()> {
        self.changes.lock().unwrap().push(change.clone());
        Ok(())
    }
}

/// An [`AppState`] over fault-injecting adapters and an in-memory broker.
pub struct Harness {
    pub state: AppState,
    pub storage: FlakyStorage,
    pub cache: FlakyCache,
    pub broker: InMemoryStream,
    pub notifier: Arc<RecordingNotifier>,
    alerts_task: JoinHandle<usize>,
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.shutdown.poll_interval = Duration::from_millis(10);
    config.shutdown.drain_timeout = Duration::from_secs(5);
    config
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async move {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_storage(InMemoryStorage::new()).await
    }

    pub async fn with_storage(storage: InMemoryStorage) -> Self {
        let storage = FlakyStorage::new(storage);
        let cache = FlakyCache::new(InMemoryCacheBackend::new());
        let broker = InMemoryStream::new();
        let notifier = Arc::new(RecordingNotifier::default());

        let (alerts, dispatcher) = alert_channel();
        let alerts_task = dispatcher.with_notifier(notifier.clone()).spawn();

        let state = AppState::new(
            test_config(),
            Arc::new(storage.clone()),
            Arc::new(cache.clone()),
            Arc::new(broker.clone()),
            Some(alerts),
        )
        .await
        .unwrap();

        Self {
            state,
            storage,
            cache,
            broker,
            notifier,
            alerts_task,
        }
    }

    pub fn cached(&self, kind: EntityKind, id: EntityId) -> Option<String> {
        self.cache.inner().peek(&CacheKey::new(kind, id))
    }

    /// Wait for every queued publish task to finish.
    pub async fn settle(&self) {
        let tasks = self.state.tasks.clone();
        tokio::time::timeout(Duration::from_secs(5), async move {
            while tasks.in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    /// Run a fresh consumer until it has handled `count` messages, then stop it.
    pub async fn consume(&self, count: u64) -> ConsumerSnapshot {
        let consumer = self.state.consumer();
        let metrics = consumer.metrics();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(consumer.run(shutdown_rx));

        tokio::time::timeout(Duration::from_secs(5), async {
            while metrics.snapshot().handled() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap().snapshot()
    }

    /// Wait until the notifier has seen `count` state changes.
    pub async fn wait_for_alerts(&self, count: usize) -> Vec<StateChange> {
        let notifier = self.notifier.clone();
        tokio::time::timeout(Duration::from_secs(5), async move {
            loop {
                let changes = notifier.changes();
                if changes.len() >= count {
                    return changes;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap()
    }

    /// Drop the state and wait for the alert dispatcher to drain.
    pub async fn finish(self) -> usize {
        drop(self.state);
        self.alerts_task.await.unwrap()
    }
}

//! Circuit state-change alerts.
//!
//! Breakers never deliver alerts themselves. A transition is pushed onto an
//! unbounded channel and an [`AlertDispatcher`] task hands it to every
//! configured [`AlertNotifier`]. Delivery failures are logged and dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crudstream_core::{CircuitState, CrudError, CrudResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Timeout for one webhook delivery.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// A breaker moved from one state to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub name: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: DateTime<Utc>,
}

impl StateChange {
    pub fn new(name: impl Into<String>, from: CircuitState, to: CircuitState) -> Self {
        Self {
            name: name.into(),
            from,
            to,
            at: Utc::now(),
        }
    }

    /// Human-readable alert text.
    pub fn message(&self) -> String {
        format!(
            "Circuit Breaker [{}] changed from {} to {}",
            self.name, self.from, self.to
        )
    }
}

/// External alerting collaborator.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, change: &StateChange) -> CrudResult<()>;
}

// ============================================================================
// NOTIFIERS
// ============================================================================

/// Writes the alert to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl AlertNotifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, change: &StateChange) -> CrudResult<()> {
        tracing::warn!(
            circuit = %change.name,
            from = %change.from,
            to = %change.to,
            "{}",
            change.message()
        );
        Ok(())
    }
}

/// Posts `{"text": message}` to a chat webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> CrudResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| CrudError::call_failed("alert-webhook", e))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AlertNotifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, change: &StateChange) -> CrudResult<()> {
        let body = serde_json::json!({ "text": change.message() });
        self.client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| CrudError::call_failed("alert-webhook", e))?;
        Ok(())
    }
}

// ============================================================================
// CHANNEL
// ============================================================================

/// Sending half handed to breakers. Sending never blocks.
#[derive(Debug, Clone)]
pub struct AlertSender {
    tx: mpsc::UnboundedSender<StateChange>,
}

impl AlertSender {
    pub fn send(&self, change: StateChange) {
        if self.tx.send(change).is_err() {
            tracing::debug!("Alert dispatcher stopped; state change not delivered");
        }
    }
}

/// Delivers queued state changes to every notifier in turn.
pub struct AlertDispatcher {
    rx: mpsc::UnboundedReceiver<StateChange>,
    notifiers: Vec<Arc<dyn AlertNotifier>>,
}

impl AlertDispatcher {
    pub fn with_notifier(mut self, notifier: Arc<dyn AlertNotifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Run until every [`AlertSender`] is dropped. Returns the number of
    /// changes dispatched.
    pub async fn run(mut self) -> usize {
        let mut dispatched = 0;
        while let Some(change) = self.rx.recv().await {
            for notifier in &self.notifiers {
                if let Err(e) = notifier.notify(&change).await {
                    tracing::error!(
                        notifier = notifier.name(),
                        circuit = %change.name,
                        error = %e,
                        "Failed to deliver circuit alert"
                    );
                }
            }
            dispatched += 1;
        }
        dispatched
    }

    pub fn spawn(self) -> JoinHandle<usize> {
        tokio::spawn(self.run())
    }
}

/// Create a connected sender and dispatcher with no notifiers attached.
pub fn alert_channel() -> (AlertSender, AlertDispatcher) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        AlertSender { tx },
        AlertDispatcher {
            rx,
            notifiers: Vec::new(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    #[async_trait]
    impl AlertNotifier for Collect {
        fn name(&self) -> &str {
            "collect"
        }

        async fn notify(&self, change: &StateChange) -> CrudResult<()> {
            self.0.lock().unwrap().push(change.message());
            Ok(())
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl AlertNotifier for AlwaysFails {
        fn name(&self) -> &str {
            "broken"
        }

        async fn notify(&self, _change: &StateChange) -> CrudResult<()> {
            Err(CrudError::call_failed("alert-webhook", "unreachable"))
        }
    }

    #[test]
    fn test_message_format() {
        let change = StateChange::new("storage", CircuitState::Closed, CircuitState::Open);
        assert_eq!(
            change.message(),
            "Circuit Breaker [storage] changed from CLOSED to OPEN"
        );
    }

    #[tokio::test]
    async fn test_dispatcher_survives_failing_notifier() {
        let collect = Arc::new(Collect::default());
        let (sender, dispatcher) = alert_channel();
        let handle = dispatcher
            .with_notifier(Arc::new(AlwaysFails))
            .with_notifier(collect.clone())
            .spawn();

        sender.send(StateChange::new("cache", CircuitState::Closed, CircuitState::Open));
        sender.send(StateChange::new("cache", CircuitState::Open, CircuitState::HalfOpen));
        drop(sender);

        assert_eq!(handle.await.unwrap(), 2);
        let seen = collect.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                "Circuit Breaker [cache] changed from CLOSED to OPEN".to_string(),
                "Circuit Breaker [cache] changed from OPEN to HALF-OPEN".to_string(),
            ]
        );
    }

    #[test]
    fn test_send_after_dispatcher_dropped_is_harmless() {
        let (sender, dispatcher) = alert_channel();
        drop(dispatcher);
        sender.send(StateChange::new("storage", CircuitState::Open, CircuitState::Closed));
    }
}

//! crudstream entry point.
//!
//! Runs the coordination layer against in-memory adapters: the consumer
//! applies events as they arrive until Ctrl-C, then shuts down in order.

use std::sync::Arc;

use crudstream_api::telemetry::init_tracing;
use crudstream_api::{alert_channel, AppConfig, AppState, LogNotifier, WebhookNotifier};
use crudstream_core::CrudResult;
use crudstream_events::InMemoryStream;
use crudstream_storage::{InMemoryCacheBackend, InMemoryStorage};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> CrudResult<()> {
    let config = AppConfig::from_env();
    init_tracing(&config.telemetry)?;
    config.validate()?;

    let (alerts, dispatcher) = alert_channel();
    let mut dispatcher = dispatcher.with_notifier(Arc::new(LogNotifier));
    if let Some(url) = &config.notifier.webhook_url {
        dispatcher = dispatcher.with_notifier(Arc::new(WebhookNotifier::new(url)?));
    }
    let alerts_task = dispatcher.spawn();

    let state = AppState::new(
        config,
        Arc::new(InMemoryStorage::new()),
        Arc::new(InMemoryCacheBackend::new()),
        Arc::new(InMemoryStream::new()),
        Some(alerts),
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut consumer = state.consumer();
    consumer.subscribe().await?;
    let consumer_task = tokio::spawn(consumer.run(shutdown_rx));

    tracing::info!(
        group = %state.config.streams.consumer_group,
        "crudstream running; press Ctrl-C to stop"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");

    shutdown_tx.send_replace(true);
    state.drain_tasks().await;

    match consumer_task.await {
        Ok(Ok(metrics)) => {
            let snapshot = metrics.snapshot();
            tracing::info!(
                received = snapshot.received,
                handled = snapshot.handled(),
                "Consumer joined"
            );
        }
        Ok(Err(e)) => tracing::error!(error = %e, "Consumer failed"),
        Err(e) => tracing::error!(error = %e, "Consumer task panicked"),
    }

    for circuit in state.breakers.snapshot().await {
        tracing::info!(circuit = %circuit.name, state = %circuit.state, "Final circuit state");
    }

    // Dropping the state drops the last alert sender, which ends the dispatcher.
    drop(state);
    if let Ok(dispatched) = alerts_task.await {
        tracing::info!(dispatched, "Alert dispatcher stopped");
    }

    Ok(())
}

//! End-to-end smoke tests for crudstream: readiness and graceful shutdown.

#[allow(dead_code)]
#[path = "support/harness.rs"]
mod harness;

use crudstream_core::{CircuitState, HealthStatus, User};
use crudstream_storage::EntityStore;
use harness::Harness;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::test]
async fn smoke_test_readiness_reflects_dependencies() {
    let h = Harness::new().await;

    let report = h.state.health.readiness().await;
    assert_eq!(report.status, HealthStatus::Healthy);
    assert_eq!(h.state.health.liveness().status, HealthStatus::Healthy);

    h.cache.set_failing(true);
    let report = h.state.health.readiness().await;
    assert_eq!(report.status, HealthStatus::Degraded);
    assert!(report.is_ready());
    assert_eq!(
        report.check("cache").unwrap().status,
        HealthStatus::Degraded
    );

    h.cache.set_failing(false);
    h.storage.set_failing(true);
    let report = h.state.health.readiness().await;
    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert!(!report.is_ready());
}

#[tokio::test]
async fn smoke_test_open_circuit_shows_in_readiness_and_snapshot() {
    let h = Harness::new().await;
    h.storage.set_failing(true);
    for id in 1..=5 {
        assert!(h.state.users.get(id).await.is_err());
    }
    h.storage.set_failing(false);

    let report = h.state.health.readiness().await;
    let storage = report.check("storage").unwrap();
    assert_eq!(storage.status, HealthStatus::Unhealthy);
    assert_eq!(storage.metadata.as_ref().unwrap()["circuit"], "OPEN");

    let snapshot = h.state.breakers.snapshot().await;
    let names: Vec<_> = snapshot.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["cache", "storage"]);
    assert_eq!(snapshot[1].state, CircuitState::Open);
}

#[tokio::test]
async fn smoke_test_graceful_shutdown() {
    let h = Harness::new().await;
    let owner = h
        .storage
        .inner()
        .user_insert(&User::draft("Ann", "ann@x.com"))
        .await
        .unwrap();

    let mut consumer = h.state.consumer();
    consumer.subscribe().await.unwrap();
    let metrics = consumer.metrics();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_task = tokio::spawn(consumer.run(shutdown_rx));

    for name in ["api", "web", "cli"] {
        h.state
            .repositories
            .create(owner.id, name, &format!("https://git/{name}"), false)
            .await
            .unwrap();
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while metrics.snapshot().applied < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    shutdown_tx.send_replace(true);
    let report = h.state.drain_tasks().await;
    assert!(report.drained);
    assert_eq!(report.aborted, 0);

    let metrics = consumer_task.await.unwrap().unwrap();
    assert_eq!(metrics.snapshot().applied, 3);
    assert_eq!(
        h.storage
            .inner()
            .repository_list_by_user(owner.id)
            .await
            .unwrap()
            .len(),
        3
    );
    assert_eq!(h.broker.committed("crud-group", "repository-events"), 3);

    assert_eq!(h.finish().await, 0);
}

//! Write usecases, the consumer, and cache invalidation through AppState.

#[allow(dead_code)]
#[path = "support/harness.rs"]
mod harness;

use crudstream_core::{
    AuditAction, CrudError, EntityKind, Repository, User, ValidationError,
};
use crudstream_storage::{EntityStore, InMemoryStorage};
use crudstream_test_utils::fields;
use harness::{wait_until, Harness};
use serde_json::json;
use tokio::sync::watch;

#[tokio::test]
async fn test_user_update_applies_and_redelivery_is_idempotent() {
    let h = Harness::with_storage(InMemoryStorage::starting_at(7)).await;
    let original = h
        .storage
        .inner()
        .user_insert(&User::draft("Old", "ann@x.com"))
        .await
        .unwrap();
    assert_eq!(original.id, 7);

    h.state
        .publisher
        .publish(
            "user-events",
            "user.updated",
            fields(json!({"id": 7, "name": "Ann", "email": "ann@x.com"})),
        )
        .await
        .unwrap();

    h.consume(1).await;
    let first = h.storage.inner().user_get(7).await.unwrap().unwrap();
    assert_eq!(first.name, "Ann");

    h.broker.rewind("crud-group", "user-events", 0).unwrap();
    let snapshot = h.consume(1).await;
    assert_eq!(snapshot.applied, 1);

    let second = h.storage.inner().user_get(7).await.unwrap().unwrap();
    assert_eq!(second.name, first.name);
    assert_eq!(second.email, first.email);
    assert_eq!(second.created_at, original.created_at);
}

#[tokio::test]
async fn test_delete_of_missing_repository_does_not_stop_consumer() {
    let h = Harness::new().await;
    h.state
        .publisher
        .publish("repository-events", "repository.deleted", fields(json!({"id": 99})))
        .await
        .unwrap();
    h.state
        .publisher
        .publish(
            "repository-events",
            "repository.created",
            fields(json!({"user_id": 1, "name": "api", "url": "https://git/api", "ai_enabled": true})),
        )
        .await
        .unwrap();

    let snapshot = h.consume(2).await;
    assert_eq!(snapshot.dropped_not_found, 1);
    assert_eq!(snapshot.applied, 1);
    assert_eq!(h.storage.inner().repository_list().await.unwrap().len(), 1);
    assert_eq!(h.broker.committed("crud-group", "repository-events"), 2);
}

#[tokio::test]
async fn test_update_invalidates_cached_snapshot() {
    let h = Harness::new().await;
    let user = h
        .storage
        .inner()
        .user_insert(&User::draft("Ann", "ann@x.com"))
        .await
        .unwrap();
    h.state.users.get(user.id).await.unwrap();
    assert!(h.cached(EntityKind::User, user.id).is_some());

    h.state
        .users
        .update(user.id, "Annie", "annie@x.com")
        .await
        .unwrap();
    h.settle().await;
    assert!(h.cached(EntityKind::User, user.id).is_none());

    // A read before the consumer catches up repopulates the old row.
    assert_eq!(h.state.users.get(user.id).await.unwrap().name, "Ann");

    h.consume(1).await;
    assert!(h.cached(EntityKind::User, user.id).is_none());

    let fresh = h.state.users.get(user.id).await.unwrap();
    assert_eq!(fresh.name, "Annie");
    assert_eq!(fresh.email, "annie@x.com");

    let audit = h.state.users.audit_logs(user.id).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::Updated);
}

#[tokio::test]
async fn test_repository_delete_removes_row_and_cache_entry() {
    let h = Harness::new().await;
    let repo = h
        .storage
        .inner()
        .repository_insert(&Repository::draft(1, "api", "https://git/api", false))
        .await
        .unwrap();
    h.state.repositories.get(repo.id).await.unwrap();

    h.state.repositories.delete(repo.id).await.unwrap();
    h.settle().await;
    h.consume(1).await;

    assert!(h.cached(EntityKind::Repository, repo.id).is_none());
    let err = h.state.repositories.get(repo.id).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_review_log_flow() {
    let h = Harness::new().await;
    let repo = h
        .storage
        .inner()
        .repository_insert(&Repository::draft(1, "api", "https://git/api", true))
        .await
        .unwrap();

    h.state.review_logs.create(repo.id, "LGTM").await.unwrap();
    h.settle().await;
    h.consume(1).await;

    let logs = h.state.review_logs.list_for_repository(repo.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].review_result, "LGTM");
    let log = h.state.review_logs.get(logs[0].id).await.unwrap();
    assert_eq!(log, logs[0]);
}

#[tokio::test]
async fn test_create_rejects_taken_email() {
    let h = Harness::new().await;
    h.storage
        .inner()
        .user_insert(&User::draft("Ann", "ann@x.com"))
        .await
        .unwrap();

    let err = h.state.users.create("Other", "ann@x.com").await.unwrap_err();
    assert!(matches!(
        err,
        CrudError::Validation(ValidationError::EmailInUse { .. })
    ));
    h.settle().await;
    assert!(h.broker.is_empty("user-events"));
}

#[tokio::test]
async fn test_update_rejects_email_owned_by_another_user() {
    let h = Harness::new().await;
    let ann = h
        .storage
        .inner()
        .user_insert(&User::draft("Ann", "ann@x.com"))
        .await
        .unwrap();
    h.storage
        .inner()
        .user_insert(&User::draft("Bo", "bo@x.com"))
        .await
        .unwrap();

    let err = h
        .state
        .users
        .update(ann.id, "Ann", "bo@x.com")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CrudError::Validation(ValidationError::EmailInUse { .. })
    ));

    // Keeping one's own email is fine.
    h.state.users.update(ann.id, "Ann B", "ann@x.com").await.unwrap();
    h.settle().await;
    assert_eq!(h.broker.len("user-events"), 1);
}

#[tokio::test]
async fn test_blank_fields_are_rejected() {
    let h = Harness::new().await;
    let err = h.state.users.create("  ", "a@x.com").await.unwrap_err();
    assert!(matches!(
        err,
        CrudError::Validation(ValidationError::RequiredFieldMissing { ref field }) if field == "name"
    ));
    assert!(h.state.review_logs.create(1, "").await.is_err());
    h.settle().await;
    assert!(h.broker.is_empty("user-events"));
    assert!(h.broker.is_empty("review-log-events"));
}

#[tokio::test]
async fn test_writes_against_missing_parents_are_not_found() {
    let h = Harness::new().await;

    assert!(h
        .state
        .repositories
        .create(9, "api", "https://git/api", false)
        .await
        .unwrap_err()
        .is_not_found());
    assert!(h
        .state
        .review_logs
        .create(9, "LGTM")
        .await
        .unwrap_err()
        .is_not_found());
    assert!(h.state.users.delete(9).await.unwrap_err().is_not_found());
    assert!(h
        .state
        .repositories
        .update(9, "api", "https://git/api", true)
        .await
        .unwrap_err()
        .is_not_found());

    h.settle().await;
    assert_eq!(h.state.tasks.spawned(), 0);
}

#[tokio::test]
async fn test_delete_is_applied_only_by_the_consumer() {
    let h = Harness::new().await;
    let user = h
        .storage
        .inner()
        .user_insert(&User::draft("Ann", "ann@x.com"))
        .await
        .unwrap();

    // The store is only consulted for the existence check; the write
    // itself never touches it.
    let calls = h.storage.calls();
    h.state.users.delete(user.id).await.unwrap();
    h.settle().await;
    assert_eq!(h.storage.calls(), calls + 1);
    assert_eq!(h.broker.len("user-events"), 1);
    assert!(h.storage.inner().user_get(user.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_store_outage_during_apply_is_retried_until_it_recovers() {
    let h = Harness::new().await;
    let user = h
        .storage
        .inner()
        .user_insert(&User::draft("Old", "old@x.com"))
        .await
        .unwrap();
    h.state
        .publisher
        .publish(
            "user-events",
            "user.updated",
            fields(json!({"id": user.id, "name": "New", "email": "new@x.com"})),
        )
        .await
        .unwrap();

    h.storage.set_failing(true);
    let consumer = h.state.consumer();
    let metrics = consumer.metrics();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(consumer.run(shutdown_rx));

    wait_until(|| metrics.snapshot().retries >= 2).await;
    assert_eq!(h.broker.committed("crud-group", "user-events"), 0);
    assert_eq!(metrics.snapshot().applied, 0);

    h.storage.set_failing(false);
    wait_until(|| metrics.snapshot().applied == 1).await;
    shutdown_tx.send(true).unwrap();
    let snapshot = handle.await.unwrap().unwrap().snapshot();

    assert_eq!(snapshot.received, 1);
    assert_eq!(snapshot.failed, 0);
    assert_eq!(h.broker.committed("crud-group", "user-events"), 1);
    let row = h.storage.inner().user_get(user.id).await.unwrap().unwrap();
    assert_eq!(row.name, "New");
}

#[tokio::test]
async fn test_event_interrupted_by_shutdown_is_redelivered() {
    let h = Harness::new().await;
    let user = h
        .storage
        .inner()
        .user_insert(&User::draft("Old", "old@x.com"))
        .await
        .unwrap();
    h.state
        .publisher
        .publish(
            "user-events",
            "user.updated",
            fields(json!({"id": user.id, "name": "New", "email": "new@x.com"})),
        )
        .await
        .unwrap();

    h.storage.set_failing(true);
    let consumer = h.state.consumer();
    let metrics = consumer.metrics();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(consumer.run(shutdown_rx));
    wait_until(|| metrics.snapshot().retries >= 1).await;

    // Shutdown interrupts the backoff without committing.
    shutdown_tx.send(true).unwrap();
    let stopped = handle.await.unwrap().unwrap().snapshot();
    assert_eq!(stopped.applied, 0);
    assert_eq!(h.broker.committed("crud-group", "user-events"), 0);

    h.storage.set_failing(false);
    let snapshot = h.consume(1).await;
    assert_eq!(snapshot.applied, 1);
    let row = h.storage.inner().user_get(user.id).await.unwrap().unwrap();
    assert_eq!(row.name, "New");
}

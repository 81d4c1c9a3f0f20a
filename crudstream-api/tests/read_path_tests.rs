//! Cache-aside reads and the storage breaker, end to end through AppState.

#[allow(dead_code)]
#[path = "support/harness.rs"]
mod harness;

use crudstream_core::{CircuitState, CrudError, DependencyError, EntityKind, User};
use crudstream_storage::{EntityStore, InMemoryStorage};
use harness::Harness;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_miss_reads_store_then_populates_cache() {
    let h = Harness::new().await;
    let user = h
        .storage
        .inner()
        .user_insert(&User::draft("Ann", "ann@x.com"))
        .await
        .unwrap();
    assert!(h.cached(EntityKind::User, user.id).is_none());

    let fetched = h.state.users.get(user.id).await.unwrap();
    assert_eq!(fetched, user);

    let raw = h.cached(EntityKind::User, user.id).unwrap();
    let snapshot: User = serde_json::from_str(&raw).unwrap();
    assert_eq!(snapshot, user);

    let key = crudstream_storage::CacheKey::new(EntityKind::User, user.id);
    assert_eq!(h.cache.inner().ttl(&key), Some(Duration::from_secs(120)));
}

#[tokio::test]
async fn test_second_read_is_served_from_cache() {
    let h = Harness::new().await;
    let user = h
        .storage
        .inner()
        .user_insert(&User::draft("Ann", "ann@x.com"))
        .await
        .unwrap();

    h.state.users.get(user.id).await.unwrap();
    let calls = h.storage.calls();
    h.state.users.get(user.id).await.unwrap();
    assert_eq!(h.storage.calls(), calls);
}

#[tokio::test]
async fn test_cache_hit_bypasses_open_store_breaker() {
    let h = Harness::new().await;
    let user = h
        .storage
        .inner()
        .user_insert(&User::draft("Ann", "ann@x.com"))
        .await
        .unwrap();
    h.state.users.get(user.id).await.unwrap();

    h.storage.set_failing(true);
    for id in 100..105 {
        let err = h.state.users.get(id).await.unwrap_err();
        assert!(err.is_unavailable());
    }
    assert_eq!(h.state.reader.store_breaker().state(), CircuitState::Open);

    let calls = h.storage.calls();
    let cached = h.state.users.get(user.id).await.unwrap();
    assert_eq!(cached.name, "Ann");

    let err = h.state.users.get(200).await.unwrap_err();
    assert!(matches!(
        err,
        CrudError::Unavailable(DependencyError::CircuitOpen { .. })
    ));
    assert_eq!(h.storage.calls(), calls);
}

#[tokio::test]
async fn test_cache_outage_falls_back_to_store() {
    let h = Harness::new().await;
    let user = h
        .storage
        .inner()
        .user_insert(&User::draft("Ann", "ann@x.com"))
        .await
        .unwrap();

    h.cache.set_failing(true);
    for _ in 0..6 {
        assert_eq!(h.state.users.get(user.id).await.unwrap(), user);
    }
    assert_eq!(h.state.reader.cache_breaker().state(), CircuitState::Open);
    assert_eq!(h.state.reader.store_breaker().state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_store_breaker_opens_probes_and_closes() {
    let h = Harness::new().await;
    let breaker = h.state.reader.store_breaker().clone();

    h.storage.set_failing(true);
    for id in 1..=5 {
        assert!(h.state.users.get(id).await.is_err());
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let calls = h.storage.calls();
    assert!(h.state.users.get(1).await.is_err());
    assert_eq!(h.storage.calls(), calls);

    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    h.storage.set_failing(false);
    let user = h
        .storage
        .inner()
        .user_insert(&User::draft("Ann", "ann@x.com"))
        .await
        .unwrap();
    assert_eq!(h.state.users.get(user.id).await.unwrap(), user);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.counts().consecutive_failures, 0);

    let changes = h.wait_for_alerts(3).await;
    let transitions: Vec<_> = changes.iter().map(|c| (c.from, c.to)).collect();
    assert_eq!(
        transitions,
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
    assert_eq!(
        h.notifier.messages()[0],
        "Circuit Breaker [storage] changed from CLOSED to OPEN"
    );
}

#[tokio::test]
async fn test_created_user_is_readable_and_cached() {
    let h = Harness::with_storage(InMemoryStorage::starting_at(42)).await;
    h.state.users.create("Bo", "bo@x.com").await.unwrap();
    h.settle().await;

    let snapshot = h.consume(1).await;
    assert_eq!(snapshot.applied, 1);

    let user = h.state.users.get(42).await.unwrap();
    assert_eq!(user.id, 42);
    assert_eq!(user.name, "Bo");
    assert_eq!(user.email, "bo@x.com");

    let key = crudstream_storage::CacheKey::new(EntityKind::User, 42);
    assert_eq!(key.to_string(), "user:42");
    assert!(h.cache.inner().contains(&key));
}

#[tokio::test]
async fn test_list_queries_hit_the_store() {
    let h = Harness::new().await;
    let owner = h
        .storage
        .inner()
        .user_insert(&User::draft("Ann", "ann@x.com"))
        .await
        .unwrap();
    for name in ["api", "web"] {
        h.storage
            .inner()
            .repository_insert(&crudstream_core::Repository::draft(
                owner.id,
                name,
                format!("https://git/{name}"),
                false,
            ))
            .await
            .unwrap();
    }

    let repos = h.state.repositories.list_for_user(owner.id).await.unwrap();
    assert_eq!(repos.len(), 2);
    assert_eq!(h.state.repositories.list().await.unwrap().len(), 2);
    assert_eq!(h.state.users.list().await.unwrap().len(), 1);
    assert_eq!(h.cache.sets(), 0);
}

use std::time::Duration;

use redis::AsyncCommands;
use tally_core::{BucketKey, CounterStore, StoreError};
use tally_store::RedisCounterStore;
use tally_test_infra::redis::RedisServer;

const TTL: Duration = Duration::from_secs(60);

/// Test fixture that owns a disposable Redis server.
pub struct RedisTestContainer {
    server: RedisServer,
}

impl RedisTestContainer {
    pub async fn start() -> Self {
        let server = RedisServer::start()
            .await
            .expect("Failed to start Redis server");
        Self { server }
    }

    pub async fn connection(&self) -> redis::aio::MultiplexedConnection {
        self.server
            .connection()
            .await
            .expect("Failed to get Redis connection")
    }

    pub async fn store(&self) -> RedisCounterStore {
        RedisCounterStore::new(self.connection().await)
    }
}

fn key(s: &str) -> BucketKey {
    BucketKey::new_unchecked(s)
}

#[tokio::test]
async fn test_set_if_absent_then_increment() {
    let fixture = RedisTestContainer::start().await;
    let store = fixture.store().await;
    let k = key("ord-19791");

    assert!(!store.exists(&k).await.unwrap());

    store.set_if_absent_with_ttl(&k, 0, TTL).await.unwrap();
    assert!(store.exists(&k).await.unwrap());

    assert_eq!(store.increment_by(&k, 1).await.unwrap(), 1);
    assert_eq!(store.increment_by(&k, 10).await.unwrap(), 11);
}

#[tokio::test]
async fn test_set_if_absent_does_not_overwrite() {
    let fixture = RedisTestContainer::start().await;
    let store = fixture.store().await;
    let k = key("ord-19791");

    store.set_if_absent_with_ttl(&k, 5, TTL).await.unwrap();
    store.set_if_absent_with_ttl(&k, 100, TTL).await.unwrap();

    assert_eq!(store.increment_by(&k, 1).await.unwrap(), 6);
}

#[tokio::test]
async fn test_increment_missing_key_does_not_create_it() {
    let fixture = RedisTestContainer::start().await;
    let store = fixture.store().await;
    let k = key("missing");

    let err = store.increment_by(&k, 1).await.unwrap_err();
    assert_eq!(err, StoreError::MissingKey("missing".to_string()));
    assert!(!store.exists(&k).await.unwrap());
}

#[tokio::test]
async fn test_set_or_increment_seeds_then_increments() {
    let fixture = RedisTestContainer::start().await;
    let store = fixture.store().await;
    let k = key("batch");

    assert_eq!(store.set_or_increment(&k, 40, 5, TTL).await.unwrap(), 40);
    assert_eq!(store.set_or_increment(&k, 40, 5, TTL).await.unwrap(), 45);
    assert_eq!(store.set_or_increment(&k, 40, 5, TTL).await.unwrap(), 50);
}

#[tokio::test]
async fn test_counters_carry_a_ttl() {
    let fixture = RedisTestContainer::start().await;
    let store = fixture.store().await;
    let k = key("ttl");

    assert_eq!(store.ttl(&k).await.unwrap(), None);

    store.set_or_increment(&k, 0, 1, TTL).await.unwrap();
    let remaining = store.ttl(&k).await.unwrap().expect("ttl should be set");
    assert!(remaining <= TTL);
    assert!(remaining > TTL - Duration::from_secs(5));

    // incrementing keeps the original expiry
    store.set_or_increment(&k, 0, 1, TTL).await.unwrap();
    assert!(store.ttl(&k).await.unwrap().unwrap() <= remaining);
}

#[tokio::test]
async fn test_counter_expires() {
    let fixture = RedisTestContainer::start().await;
    let store = fixture.store().await;
    let k = key("short");

    store
        .set_if_absent_with_ttl(&k, 0, Duration::from_millis(200))
        .await
        .unwrap();
    assert!(store.exists(&k).await.unwrap());

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(!store.exists(&k).await.unwrap());
    assert_eq!(store.set_or_increment(&k, 7, 1, TTL).await.unwrap(), 7);
}

#[tokio::test]
async fn test_namespace_prefixes_store_keys() {
    let fixture = RedisTestContainer::start().await;
    let mut conn = fixture.connection().await;
    let app_a = RedisCounterStore::with_namespace(conn.clone(), "a:");
    let app_b = RedisCounterStore::with_namespace(conn.clone(), "b:");
    let k = key("ord-1");

    app_a.set_or_increment(&k, 0, 1, TTL).await.unwrap();
    app_a.set_or_increment(&k, 0, 1, TTL).await.unwrap();
    assert_eq!(app_b.set_or_increment(&k, 0, 1, TTL).await.unwrap(), 0);

    let raw: i64 = conn.get("a:ord-1").await.unwrap();
    assert_eq!(raw, 1);
}

#[tokio::test]
async fn test_non_integer_value_is_an_operation_error() {
    let fixture = RedisTestContainer::start().await;
    let mut conn = fixture.connection().await;
    let store = RedisCounterStore::new(conn.clone());

    let _: () = conn.set("text", "not-a-number").await.unwrap();

    let err = store.increment_by(&key("text"), 1).await.unwrap_err();
    assert!(matches!(err, StoreError::Operation(_)), "{err:?}");
}

#[tokio::test]
async fn test_connect_by_url() {
    let fixture = RedisTestContainer::start().await;
    let store = RedisCounterStore::connect(fixture.server.url()).await.unwrap();

    assert_eq!(store.set_or_increment(&key("url"), 1, 1, TTL).await.unwrap(), 1);
}

#[tokio::test]
async fn test_concurrent_set_or_increment_is_atomic() {
    let fixture = RedisTestContainer::start().await;
    let store = fixture.store().await;
    let k = key("race");

    let mut handles = vec![];
    for _ in 0..50 {
        let store = store.clone();
        let k = k.clone();
        handles.push(tokio::spawn(async move {
            store.set_or_increment(&k, 0, 1, TTL).await.unwrap()
        }));
    }

    let mut values = vec![];
    for handle in handles {
        values.push(handle.await.unwrap());
    }
    values.sort_unstable();

    assert_eq!(values, (0..50).collect::<Vec<_>>());
}

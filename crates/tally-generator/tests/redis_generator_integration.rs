use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use jiff::Timestamp;
use tally_core::{Clock, CounterStore, ManualClock};
use tally_generator::{AllocationMode, GeneratorSettings, SerialCodeGenerator};
use tally_store::RedisCounterStore;
use tally_test_infra::redis::RedisServer;

async fn start_store() -> (RedisServer, RedisCounterStore) {
    let server = RedisServer::start()
        .await
        .expect("Failed to start Redis server");
    let conn = server
        .connection()
        .await
        .expect("Failed to get Redis connection");
    (server, RedisCounterStore::with_namespace(conn, "test:"))
}

fn daily(mode: AllocationMode) -> GeneratorSettings {
    GeneratorSettings::builder()
        .key_prefix("ord-")
        .serial_code_format("ORD%2$tY%<tm%<td%1$04d")
        .reset_period(Duration::from_secs(86_400))
        .mode(mode)
        .build()
}

#[tokio::test]
async fn test_generates_daily_sequence_against_redis() {
    let (_server, store) = start_store().await;
    let clock = ManualClock::new("2024-03-09T09:30:00Z".parse::<Timestamp>().unwrap());
    let generator =
        SerialCodeGenerator::with_clock(daily(AllocationMode::Atomic), store, clock.clone())
            .unwrap();

    let first = generator.generate().await.unwrap();
    let batch = generator.batch_generate(2).await.unwrap();
    clock.set("2024-03-10T00:00:00Z".parse().unwrap());
    let next_day = generator.generate().await.unwrap();

    assert_eq!(first.as_str(), "ORD202403090000");
    assert_eq!(batch[0].as_str(), "ORD202403090001");
    assert_eq!(batch[1].as_str(), "ORD202403090002");
    assert_eq!(next_day.as_str(), "ORD202403100000");
}

#[tokio::test]
async fn test_legacy_mode_against_redis() {
    let (_server, store) = start_store().await;
    let clock = ManualClock::new("2024-03-09T09:30:00Z".parse::<Timestamp>().unwrap());
    let generator =
        SerialCodeGenerator::with_clock(daily(AllocationMode::Legacy), store, clock).unwrap();

    let codes = generator.batch_generate(3).await.unwrap();

    assert_eq!(codes[0].as_str(), "ORD202403090000");
    assert_eq!(codes[2].as_str(), "ORD202403090002");
}

#[tokio::test]
async fn test_counter_key_gets_padded_ttl() {
    let (_server, store) = start_store().await;
    let clock = ManualClock::new("2024-03-09T09:30:00Z".parse::<Timestamp>().unwrap());
    let generator =
        SerialCodeGenerator::with_clock(daily(AllocationMode::Atomic), store, clock.clone())
            .unwrap();

    generator.generate().await.unwrap();

    let key = generator.key_at(clock.now());
    let ttl = generator
        .store()
        .ttl(&key)
        .await
        .unwrap()
        .expect("counter should expire");
    assert!(ttl > Duration::from_secs(86_400));
    assert!(ttl <= Duration::from_millis(129_600_000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_generators_share_one_counter() {
    let (_server, store) = start_store().await;
    let clock = ManualClock::new("2024-03-09T09:30:00Z".parse::<Timestamp>().unwrap());

    // two instances over the same Redis, as two service replicas would be
    let replicas = [
        Arc::new(
            SerialCodeGenerator::with_clock(
                daily(AllocationMode::Atomic),
                store.clone(),
                clock.clone(),
            )
            .unwrap(),
        ),
        Arc::new(
            SerialCodeGenerator::with_clock(daily(AllocationMode::Atomic), store, clock).unwrap(),
        ),
    ];

    let mut handles = vec![];
    for i in 0..40 {
        let generator = Arc::clone(&replicas[i % 2]);
        handles.push(tokio::spawn(async move { generator.generate().await.unwrap() }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        assert!(seen.insert(handle.await.unwrap().into_string()));
    }
    assert_eq!(seen.len(), 40);
    assert!(seen.contains("ORD202403090000"));
    assert!(seen.contains("ORD202403090039"));
}

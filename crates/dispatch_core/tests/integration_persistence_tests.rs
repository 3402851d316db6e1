mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dispatch_core::config::RetryConfig;
use dispatch_core::persistence::{
    driver_cache_key, read_through, LocationCache, MemoryCache, PersistCommand, PersistHandle,
    WriteThrough,
};
use dispatch_core::rides::RideStatus;
use dispatch_core::telemetry::DispatchTelemetry;
use dispatch_core::test_helpers::{driver_update, ride_intake, sf_origin};
use dispatch_core::types::{DriverId, RequestId};
use tokio_util::sync::CancellationToken;

use support::harness::Harness;
use support::stores::FlakyStore;

const TTL: Duration = Duration::from_secs(300);

fn retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_backoff_ms: 50,
        max_backoff_ms: 400,
        timeout_ms: 250,
    }
}

fn writer(
    cache: &Arc<MemoryCache>,
    store: &Arc<FlakyStore>,
    telemetry: &Arc<DispatchTelemetry>,
) -> WriteThrough<MemoryCache, FlakyStore> {
    WriteThrough::new(
        Arc::clone(cache),
        Arc::clone(store),
        retry(),
        TTL,
        Arc::clone(telemetry),
    )
}

#[tokio::test(start_paused = true)]
async fn transient_store_failures_are_retried() {
    let harness = Harness::new();
    harness
        .index
        .upsert(driver_update(4, sf_origin(), harness.now()))
        .expect("upsert");
    let state = harness.index.get(DriverId(4)).expect("driver");

    let cache = Arc::new(MemoryCache::new(128));
    let store = Arc::new(FlakyStore::failing(2));
    let writer = writer(&cache, &store, &harness.telemetry);
    writer.persist(PersistCommand::Driver(state.clone())).await;

    assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    assert_eq!(store.inner.driver(DriverId(4)), Some(state));
    let snapshot = harness.telemetry.snapshot();
    assert_eq!(snapshot.write_through_ok, 1);
    assert_eq!(snapshot.write_through_failed, 0);
}

#[tokio::test(start_paused = true)]
async fn hung_store_gives_up_and_leaves_index_untouched() {
    let harness = Harness::new();
    harness
        .index
        .upsert(driver_update(4, sf_origin(), harness.now()))
        .expect("upsert");
    let state = harness.index.get(DriverId(4)).expect("driver");

    let cache = Arc::new(MemoryCache::new(128));
    let store = Arc::new(FlakyStore::hanging(10));
    let writer = writer(&cache, &store, &harness.telemetry);
    writer.persist(PersistCommand::Driver(state.clone())).await;

    assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    assert_eq!(store.inner.driver_count(), 0);
    // The cache write succeeded independently of the store.
    assert!(cache
        .get(&driver_cache_key(DriverId(4)))
        .await
        .expect("cache")
        .is_some());
    assert_eq!(harness.telemetry.snapshot().write_through_failed, 1);
    assert_eq!(harness.index.get(DriverId(4)), Some(state));
}

#[tokio::test(start_paused = true)]
async fn write_through_task_persists_ride_lifecycle() {
    let mut harness = Harness::new();
    let cache = Arc::new(MemoryCache::new(128));
    let store = Arc::new(FlakyStore::failing(0));
    let writer = writer(&cache, &store, &harness.telemetry);

    harness
        .dispatcher
        .submit(ride_intake(21, sf_origin()))
        .expect("submit");
    harness.dispatcher.cancel(RequestId(21)).expect("cancel");

    // Hand the harness queue to a running write-through task.
    let (_unused, placeholder) = PersistHandle::channel(1, Arc::clone(&harness.telemetry));
    let rx = std::mem::replace(&mut harness.persisted, placeholder);
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(writer.run(rx, shutdown.clone()));
    tokio::time::sleep(Duration::from_millis(10)).await;
    shutdown.cancel();
    task.await.expect("write-through task");

    let ride = store.inner.ride(RequestId(21)).expect("persisted ride");
    assert_eq!(ride.status, RideStatus::Cancelled);
}

#[tokio::test]
async fn read_through_prefers_cache_then_store() {
    let harness = Harness::new();
    harness
        .index
        .upsert(driver_update(8, sf_origin(), harness.now()))
        .expect("upsert");
    let state = harness.index.get(DriverId(8)).expect("driver");

    let cache = MemoryCache::new(16);
    let store = FlakyStore::failing(0);
    assert_eq!(
        read_through(&cache, &store, DriverId(8), TTL).await.expect("lookup"),
        None
    );

    cache
        .put(
            driver_cache_key(DriverId(8)),
            serde_json::to_string(&state).expect("json"),
            TTL,
        )
        .await
        .expect("put");
    assert_eq!(
        read_through(&cache, &store, DriverId(8), TTL).await.expect("lookup"),
        Some(state)
    );
    // Served from cache: the store was only consulted for the first miss.
    assert_eq!(store.calls.load(Ordering::SeqCst), 1);
}

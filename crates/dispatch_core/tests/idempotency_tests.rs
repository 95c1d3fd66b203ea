mod support;

use dispatch_core::entities::Tier;
use dispatch_core::error::DispatchError;
use dispatch_core::ops::CreateRideRequest;
use dispatch_core::store::StateStore;

use support::{TestEngine, TestEngineBuilder, BLR_CENTER, CHENNAI};

fn standard_request() -> CreateRideRequest {
    TestEngine::ride_request(BLR_CENTER, CHENNAI, Tier::Standard)
}

/// Replaying `create_ride` with the same key and body returns the stored
/// response byte-for-byte and creates no second ride.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn same_key_same_body_replays_verbatim() {
    let harness = TestEngineBuilder::new().with_matching_budget_ms(100).build();
    let rider = harness.rider_token("rider-1");
    let request = standard_request();

    let first = harness
        .engine
        .create_ride(&rider, &request, Some("K1"))
        .await
        .unwrap();
    let second = harness
        .engine
        .create_ride(&rider, &request, Some("K1"))
        .await
        .unwrap();

    assert_eq!(first.status, second.status);
    assert_eq!(first.body_string(), second.body_string());

    // One ride row only: the replayed id resolves, and it carries the key.
    let ride_id = first.body["ride_id"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .expect("ride id in body");
    let ride = harness.store.get_ride(ride_id).await.unwrap().unwrap();
    assert_eq!(ride.idempotency_key.as_deref(), Some("K1"));

    harness.engine.shutdown().await;
}

/// Same key, different body → conflict, and the original response stays
/// replayable.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn same_key_different_body_conflicts() {
    let harness = TestEngineBuilder::new().with_matching_budget_ms(100).build();
    let rider = harness.rider_token("rider-1");

    let original = harness
        .engine
        .create_ride(&rider, &standard_request(), Some("K1"))
        .await
        .unwrap();

    let mut tampered = standard_request();
    tampered.tier = Tier::Premium;
    let err = harness
        .engine
        .create_ride(&rider, &tampered, Some("K1"))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Conflict(_)));
    assert_eq!(err.status_code(), 409);

    let replay = harness
        .engine
        .create_ride(&rider, &standard_request(), Some("K1"))
        .await
        .unwrap();
    assert_eq!(replay.body_string(), original.body_string());

    harness.engine.shutdown().await;
}

/// Keys are scoped per subject: two riders may use the same client key.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn keys_are_scoped_per_subject() {
    let harness = TestEngineBuilder::new().with_matching_budget_ms(100).build();
    let rider_a = harness.rider_token("rider-a");
    let rider_b = harness.rider_token("rider-b");
    let request = standard_request();

    let a = harness
        .engine
        .create_ride(&rider_a, &request, Some("K1"))
        .await
        .unwrap();
    let b = harness
        .engine
        .create_ride(&rider_b, &request, Some("K1"))
        .await
        .unwrap();
    assert_ne!(a.body["ride_id"], b.body["ride_id"]);

    harness.engine.shutdown().await;
}

/// Concurrent duplicates share one execution (singleflight): one ride row,
/// identical responses.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_share_one_execution() {
    let harness = TestEngineBuilder::new().with_matching_budget_ms(100).build();
    let rider = harness.rider_token("rider-1");
    let request = standard_request();

    let (first, second, third) = tokio::join!(
        harness.engine.create_ride(&rider, &request, Some("K1")),
        harness.engine.create_ride(&rider, &request, Some("K1")),
        harness.engine.create_ride(&rider, &request, Some("K1")),
    );
    let bodies = [
        first.unwrap().body_string(),
        second.unwrap().body_string(),
        third.unwrap().body_string(),
    ];
    assert_eq!(bodies[0], bodies[1]);
    assert_eq!(bodies[1], bodies[2]);

    harness.engine.shutdown().await;
}

/// Requests without a client key are never deduplicated.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_key_opts_out() {
    let harness = TestEngineBuilder::new().with_matching_budget_ms(100).build();
    let rider = harness.rider_token("rider-1");
    let request = standard_request();

    let a = harness.engine.create_ride(&rider, &request, None).await.unwrap();
    let b = harness.engine.create_ride(&rider, &request, None).await.unwrap();
    assert_ne!(a.body["ride_id"], b.body["ride_id"]);

    harness.engine.shutdown().await;
}

mod support;

use dispatch_core::entities::{PaymentMethod, PaymentStatus, Tier, TripId};
use dispatch_core::error::DispatchError;
use dispatch_core::ops::{CapturePaymentRequest, CapturePaymentResponse, EndTripRequest, EndTripResponse};
use dispatch_core::psp::CaptureOutcome;
use dispatch_core::store::StateStore;

use support::{TestEngine, TestEngineBuilder, BLR_CENTER, CHENNAI};

/// Drives a ride to a completed trip and returns (trip_id, server fare,
/// rider token).
async fn completed_trip(harness: &TestEngine, phone: &str) -> (TripId, f64, String) {
    let driver_id = harness
        .available_driver(phone, Tier::Standard, BLR_CENTER)
        .await;
    let rider = harness.rider_token(&format!("rider-{phone}"));
    let created = harness.create_ride(&rider, BLR_CENTER, CHENNAI).await;
    harness.wait_for_settled(created.ride_id).await;

    let trip = harness
        .store
        .get_trip_by_ride(created.ride_id)
        .await
        .unwrap()
        .expect("trip");
    let driver_token = harness.driver_token(driver_id);
    let ended: EndTripResponse = harness
        .engine
        .end_trip(
            &driver_token,
            &EndTripRequest {
                trip_id: trip.id,
                final_lat: CHENNAI.lat,
                final_lng: CHENNAI.lng,
            },
        )
        .await
        .unwrap()
        .parse()
        .unwrap();
    (trip.id, ended.final_fare, rider)
}

fn capture_request(trip_id: TripId, amount: f64) -> CapturePaymentRequest {
    CapturePaymentRequest {
        trip_id,
        amount,
        payment_method: PaymentMethod::Card,
    }
}

/// Tampered amounts are rejected with `conflict` and the payment stays
/// pending; the correct amount still captures afterwards.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fare_tampering_is_rejected() {
    let harness = TestEngineBuilder::new().build();
    let (trip_id, fare, rider) = completed_trip(&harness, "9000000011").await;

    let err = harness
        .engine
        .capture_payment(&rider, &capture_request(trip_id, 100.0), Some("K1"))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Conflict(_)));
    assert_eq!(harness.psp.call_count(), 0);

    let payment = harness
        .store
        .get_payment_by_trip(trip_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);

    // The same client key is reusable because the conflict was not cached.
    let captured: CapturePaymentResponse = harness
        .engine
        .capture_payment(&rider, &capture_request(trip_id, fare), Some("K1"))
        .await
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(captured.status, PaymentStatus::Success);

    harness.engine.shutdown().await;
}

/// Arbitrary duplication of `capture_payment` with one key yields exactly one
/// PSP charge and a terminal payment row.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicated_capture_charges_psp_once() {
    let harness = TestEngineBuilder::new().build();
    let (trip_id, fare, rider) = completed_trip(&harness, "9000000012").await;
    let request = capture_request(trip_id, fare);

    let (a, b, c) = tokio::join!(
        harness.engine.capture_payment(&rider, &request, Some("K1")),
        harness.engine.capture_payment(&rider, &request, Some("K1")),
        harness.engine.capture_payment(&rider, &request, Some("K1")),
    );
    let bodies = [
        a.unwrap().body_string(),
        b.unwrap().body_string(),
        c.unwrap().body_string(),
    ];
    assert_eq!(bodies[0], bodies[1]);
    assert_eq!(bodies[1], bodies[2]);
    assert_eq!(harness.psp.call_count(), 1);

    // Sequential replay afterwards still does not re-charge.
    let replay: CapturePaymentResponse = harness
        .engine
        .capture_payment(&rider, &request, Some("K1"))
        .await
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(replay.status, PaymentStatus::Success);
    assert_eq!(harness.psp.call_count(), 1);

    let payment = harness
        .store
        .get_payment_by_trip(trip_id)
        .await
        .unwrap()
        .unwrap();
    assert!(payment.status.is_terminal());

    harness.engine.shutdown().await;
}

/// A declined charge finalizes the payment as failed, terminally.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn declined_charge_fails_terminally() {
    let harness = TestEngineBuilder::new().build();
    let (trip_id, fare, rider) = completed_trip(&harness, "9000000013").await;
    harness.psp.script(Ok(CaptureOutcome::Declined));

    let declined: CapturePaymentResponse = harness
        .engine
        .capture_payment(&rider, &capture_request(trip_id, fare), Some("K1"))
        .await
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(declined.status, PaymentStatus::Failed);

    // A later capture attempt with a fresh key conflicts: the row is terminal.
    let err = harness
        .engine
        .capture_payment(&rider, &capture_request(trip_id, fare), Some("K2"))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Conflict(_)));

    harness.engine.shutdown().await;
}

/// A PSP transport error leaves the payment pending and the client key
/// usable; the retry succeeds and charges once more only.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn psp_error_keeps_payment_pending_and_retryable() {
    let harness = TestEngineBuilder::new().build();
    let (trip_id, fare, rider) = completed_trip(&harness, "9000000014").await;
    harness
        .psp
        .script(Err(DispatchError::Unavailable {
            dependency: "psp",
            details: "connection refused".into(),
        }));

    let err = harness
        .engine
        .capture_payment(&rider, &capture_request(trip_id, fare), Some("K1"))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    let payment = harness
        .store
        .get_payment_by_trip(trip_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);

    let captured: CapturePaymentResponse = harness
        .engine
        .capture_payment(&rider, &capture_request(trip_id, fare), Some("K1"))
        .await
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(captured.status, PaymentStatus::Success);
    assert_eq!(harness.psp.call_count(), 2);

    harness.engine.shutdown().await;
}

/// Capturing before the trip completes is a conflict.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn capture_requires_completed_trip() {
    let harness = TestEngineBuilder::new().build();
    let driver_id = harness
        .available_driver("9000000015", Tier::Standard, BLR_CENTER)
        .await;
    let rider = harness.rider_token("rider-x");
    let created = harness.create_ride(&rider, BLR_CENTER, CHENNAI).await;
    harness.wait_for_settled(created.ride_id).await;
    let _ = driver_id;

    let trip = harness
        .store
        .get_trip_by_ride(created.ride_id)
        .await
        .unwrap()
        .expect("trip");
    let err = harness
        .engine
        .capture_payment(&rider, &capture_request(trip.id, 100.0), Some("K1"))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Conflict(_)));

    harness.engine.shutdown().await;
}

mod support;

use dispatch_core::config::FareSchedule;
use dispatch_core::entities::Tier;
use dispatch_core::pricing::{calculate_fare, round2};
use dispatch_core::spatial::haversine_km;
use uuid::Uuid;

use support::{TestEngineBuilder, BLR_CENTER, CHENNAI};

/// Ten demand events against two observed drivers: ratio 5 → multiplier 3.0,
/// captured on the next ride and reflected in its estimate.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn demand_pressure_prices_the_next_ride() {
    let harness = TestEngineBuilder::new().with_matching_budget_ms(50).build();
    let rider = harness.rider_token("rider-1");

    // Two drivers seen by the supply sweep in this cell.
    let surge = harness.engine.surge();
    surge.observe_supply(Uuid::new_v4(), BLR_CENTER).unwrap();
    surge.observe_supply(Uuid::new_v4(), BLR_CENTER).unwrap();

    // Ten requests in the window (they cancel for lack of drivers; the demand
    // events still count).
    for _ in 0..10 {
        harness.create_ride(&rider, BLR_CENTER, CHENNAI).await;
    }

    let priced = harness.create_ride(&rider, BLR_CENTER, CHENNAI).await;
    assert_eq!(priced.surge_multiplier, 3.0);

    let expected = calculate_fare(
        &FareSchedule::default(),
        Tier::Standard,
        haversine_km(BLR_CENTER, CHENNAI),
        3.0,
    );
    assert!((priced.estimated_fare - expected).abs() < 0.01);

    harness.engine.shutdown().await;
}

/// The multiplier never exceeds the configured ceiling, and fares scale with
/// the frozen multiplier, not live counters.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn multiplier_clamps_and_freezes_on_the_ride() {
    let harness = TestEngineBuilder::new().with_matching_budget_ms(50).build();
    let rider = harness.rider_token("rider-1");

    for _ in 0..50 {
        harness.create_ride(&rider, BLR_CENTER, CHENNAI).await;
    }
    let priced = harness.create_ride(&rider, BLR_CENTER, CHENNAI).await;
    assert_eq!(priced.surge_multiplier, 5.0);

    // The stored ride keeps the multiplier it was created with.
    let ride = harness.wait_for_settled(priced.ride_id).await;
    assert_eq!(ride.surge_multiplier, 5.0);
    assert_eq!(
        ride.estimated_fare,
        round2(
            FareSchedule::default().base_fare.get(Tier::Standard)
                + haversine_km(BLR_CENTER, CHENNAI)
                    * FareSchedule::default().per_km_rate.get(Tier::Standard)
                    * 5.0
        )
    );

    harness.engine.shutdown().await;
}

/// Surge is per-cell: pressure in one area does not price a distant one.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn surge_is_cell_local() {
    let harness = TestEngineBuilder::new().with_matching_budget_ms(50).build();
    let rider = harness.rider_token("rider-1");

    for _ in 0..20 {
        harness.create_ride(&rider, BLR_CENTER, CHENNAI).await;
    }

    // Chennai is far outside the Bengaluru surge cell.
    let far = harness.create_ride(&rider, CHENNAI, BLR_CENTER).await;
    assert_eq!(far.surge_multiplier, 1.0);

    harness.engine.shutdown().await;
}

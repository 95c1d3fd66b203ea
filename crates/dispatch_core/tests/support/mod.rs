#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::auth::{Subject, TokenRegistry};
use dispatch_core::config::{DispatchConfig, MatchingConfig, SurgeConfig};
use dispatch_core::engine::Engine;
use dispatch_core::entities::{
    DriverId, DriverStatus, GeoPoint, PaymentMethod, RideId, RideSnapshot, RideStatus, Tier,
};
use dispatch_core::ops::{
    CreateRideRequest, CreateRideResponse, GetRideRequest, LocationUpdateRequest,
    RegisterDriverRequest, RegisterDriverResponse, SetDriverStatusRequest,
};
use dispatch_core::psp::StubProcessor;
use dispatch_core::store::MemoryStore;

pub const BLR_CENTER: GeoPoint = GeoPoint {
    lat: 12.9716,
    lng: 77.5946,
};
pub const CHENNAI: GeoPoint = GeoPoint {
    lat: 13.0827,
    lng: 80.2707,
};

/// Builder configuration for reproducible test engines.
#[derive(Clone, Debug)]
pub struct TestEngineConfig {
    pub matching_budget_ms: u64,
    pub matching_retry_delay_ms: u64,
    pub flush_interval_ms: u64,
    pub surge: SurgeConfig,
}

impl Default for TestEngineConfig {
    fn default() -> Self {
        Self {
            matching_budget_ms: 2_000,
            matching_retry_delay_ms: 20,
            flush_interval_ms: 50,
            surge: SurgeConfig::default(),
        }
    }
}

/// Wires an [`Engine`] over the in-memory store, stub PSP and a token
/// registry, with timings shrunk for tests.
#[derive(Default)]
pub struct TestEngineBuilder {
    config: TestEngineConfig,
    started: bool,
}

pub struct TestEngine {
    pub engine: Engine,
    pub store: Arc<MemoryStore>,
    pub psp: Arc<StubProcessor>,
    pub auth: Arc<TokenRegistry>,
}

impl TestEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: TestEngineConfig::default(),
            started: true,
        }
    }

    /// Build without spawning workers (tests that drive matching by hand).
    pub fn without_workers(mut self) -> Self {
        self.started = false;
        self
    }

    pub fn with_matching_budget_ms(mut self, budget_ms: u64) -> Self {
        self.config.matching_budget_ms = budget_ms;
        self
    }

    pub fn with_surge(mut self, surge: SurgeConfig) -> Self {
        self.config.surge = surge;
        self
    }

    pub fn build(self) -> TestEngine {
        let store = Arc::new(MemoryStore::new());
        let psp = Arc::new(StubProcessor::new());
        let auth = Arc::new(TokenRegistry::new());

        let config = DispatchConfig::default()
            .with_matching(MatchingConfig {
                budget_ms: self.config.matching_budget_ms,
                retry_delay_ms: self.config.matching_retry_delay_ms,
                ..Default::default()
            })
            .with_surge(self.config.surge)
            .with_location(dispatch_core::config::LocationConfig {
                flush_interval_ms: self.config.flush_interval_ms,
                ..Default::default()
            });

        let engine = Engine::new(config, store.clone(), psp.clone(), auth.clone());
        if self.started {
            engine.start().expect("engine starts once");
        }
        TestEngine {
            engine,
            store,
            psp,
            auth,
        }
    }
}

impl TestEngine {
    pub fn rider_token(&self, rider_id: &str) -> String {
        let token = format!("rider-token-{rider_id}");
        self.auth.register(token.clone(), Subject::rider(rider_id));
        token
    }

    pub fn driver_token(&self, driver_id: DriverId) -> String {
        let token = format!("driver-token-{driver_id}");
        self.auth
            .register(token.clone(), Subject::driver(driver_id.to_string()));
        token
    }

    /// Register a driver, flip it `available`, and report a position.
    pub async fn available_driver(&self, phone: &str, tier: Tier, at: GeoPoint) -> DriverId {
        let response = self
            .engine
            .register_driver(&RegisterDriverRequest {
                name: format!("driver-{phone}"),
                phone: phone.into(),
                tier,
            })
            .await
            .expect("driver registration");
        let registered: RegisterDriverResponse = response.parse().expect("typed response");
        let driver_id = registered.driver_id;

        let token = self.driver_token(driver_id);
        self.engine
            .set_driver_status(
                &token,
                &SetDriverStatusRequest {
                    driver_id,
                    status: DriverStatus::Available,
                },
            )
            .await
            .expect("status change");
        self.engine
            .location_update(
                &token,
                &LocationUpdateRequest {
                    driver_id,
                    lat: at.lat,
                    lng: at.lng,
                },
            )
            .await
            .expect("location update");
        driver_id
    }

    pub fn ride_request(pickup: GeoPoint, dest: GeoPoint, tier: Tier) -> CreateRideRequest {
        CreateRideRequest {
            pickup_lat: pickup.lat,
            pickup_lng: pickup.lng,
            dest_lat: dest.lat,
            dest_lng: dest.lng,
            tier,
            payment_method: PaymentMethod::Card,
        }
    }

    pub async fn create_ride(&self, token: &str, pickup: GeoPoint, dest: GeoPoint) -> CreateRideResponse {
        let response = self
            .engine
            .create_ride(token, &Self::ride_request(pickup, dest, Tier::Standard), None)
            .await
            .expect("ride creation");
        response.parse().expect("typed response")
    }

    pub async fn snapshot(&self, token: &str, ride_id: RideId) -> RideSnapshot {
        self.engine
            .get_ride(token, &GetRideRequest { ride_id })
            .await
            .expect("get_ride")
            .parse()
            .expect("snapshot")
    }

    /// Poll the store until the ride leaves `REQUESTED` (or the wait ends).
    /// Reads go to the store directly so the status cache is not populated
    /// while matching is mid-transition.
    pub async fn wait_for_settled(&self, ride_id: RideId) -> dispatch_core::entities::RideRecord {
        use dispatch_core::store::StateStore;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let ride = self
                .store
                .get_ride(ride_id)
                .await
                .expect("store read")
                .expect("ride exists");
            if ride.status != RideStatus::Requested {
                return ride;
            }
            if tokio::time::Instant::now() > deadline {
                return ride;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

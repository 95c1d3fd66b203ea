//! Durable state: the transactional store behind drivers, rides, trips and
//! payments.
//!
//! [`StateStore`] is the seam between the engine and persistence. The Postgres
//! backend is the production implementation; [`MemoryStore`] provides the same
//! atomicity guarantees in-process for tests and single-node deployments.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{
    DriverId, DriverRecord, DriverStatus, GeoPoint, PaymentId, PaymentMethod, PaymentRecord,
    PaymentStatus, RideId, RideRecord, Tier, TripId, TripRecord,
};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct NewDriver {
    pub name: String,
    pub phone: String,
    pub tier: Tier,
}

#[derive(Debug, Clone)]
pub struct NewRide {
    pub rider_id: String,
    pub pickup: GeoPoint,
    pub dest: GeoPoint,
    pub tier: Tier,
    pub payment_method: PaymentMethod,
    pub estimated_fare: f64,
    pub surge_multiplier: f64,
    pub idempotency_key: Option<String>,
}

/// Result of the atomic assignment transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOutcome {
    /// Ride matched, driver on trip, trip row created.
    Assigned { trip_id: TripId },
    /// The ride left `REQUESTED` (cancelled or already matched).
    RideConflict,
    /// The driver row was locked elsewhere or no longer `available`.
    DriverConflict,
}

/// One driver position sample from the ingest buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationSample {
    pub driver_id: DriverId,
    pub lat: f64,
    pub lng: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Durable completion record for an idempotency key.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord {
    pub endpoint: String,
    pub subject_id: String,
    pub key: String,
    pub request_fingerprint: String,
    pub status_code: u16,
    pub response_body: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait StateStore: Send + Sync {
    // ==================== Drivers ====================

    /// Insert a driver (`offline`). Fails with `conflict` on duplicate phone.
    async fn create_driver(&self, new: NewDriver) -> Result<DriverRecord>;

    async fn get_driver(&self, id: DriverId) -> Result<Option<DriverRecord>>;

    /// Operator-facing status change. `on_trip` is engine-owned: a driver
    /// currently on a trip cannot be moved by this call.
    async fn set_driver_status(&self, id: DriverId, status: DriverStatus) -> Result<DriverRecord>;

    /// Multi-row upsert of last-known positions (background flush path).
    async fn update_driver_locations(&self, batch: &[LocationSample]) -> Result<()>;

    // ==================== Rides ====================

    async fn create_ride(&self, new: NewRide) -> Result<RideRecord>;

    async fn get_ride(&self, id: RideId) -> Result<Option<RideRecord>>;

    /// One transaction: lock driver (skip-locked) and ride rows, verify
    /// `ride = REQUESTED` and `driver = available`, then write all four
    /// mutations (ride → MATCHED, driver → on_trip, trip inserted).
    async fn assign_ride_atomic(&self, ride_id: RideId, driver_id: DriverId)
        -> Result<AssignOutcome>;

    /// `MATCHED → STARTED` (driver arrived at pickup).
    async fn start_trip(&self, ride_id: RideId) -> Result<RideRecord>;

    /// Driver confirmation: stamps `driver_confirmed_at` on the trip without
    /// changing ride status. Conflict unless the ride is `MATCHED` and
    /// assigned to this driver.
    async fn confirm_trip(
        &self,
        ride_id: RideId,
        driver_id: DriverId,
        at: DateTime<Utc>,
    ) -> Result<TripRecord>;

    /// Terminal cancellation; only legal from `REQUESTED` or `MATCHED`.
    async fn cancel_ride(&self, ride_id: RideId, reason: &str) -> Result<RideRecord>;

    // ==================== Trips ====================

    async fn get_trip(&self, id: TripId) -> Result<Option<TripRecord>>;

    async fn get_trip_by_ride(&self, ride_id: RideId) -> Result<Option<TripRecord>>;

    /// One transaction: trip → completed (with distance/fare/endpoint), ride →
    /// COMPLETED, driver → available, payment inserted `pending`. Returns the
    /// new payment row.
    async fn end_trip(
        &self,
        trip_id: TripId,
        final_point: GeoPoint,
        distance_km: f64,
        final_fare: f64,
    ) -> Result<PaymentRecord>;

    // ==================== Payments ====================

    async fn get_payment(&self, id: PaymentId) -> Result<Option<PaymentRecord>>;

    async fn get_payment_by_trip(&self, trip_id: TripId) -> Result<Option<PaymentRecord>>;

    /// Idempotent terminal transition from `pending`. A repeat with the same
    /// outcome is a no-op; a different terminal outcome is a conflict.
    async fn finalize_payment(
        &self,
        id: PaymentId,
        outcome: PaymentStatus,
        psp_ref: Option<String>,
    ) -> Result<PaymentRecord>;

    // ==================== Idempotency ====================

    async fn save_idempotency(&self, record: &IdempotencyRecord) -> Result<()>;

    async fn load_idempotency(
        &self,
        endpoint: &str,
        subject_id: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>>;
}

//! PostgreSQL-backed state store.
//!
//! Row locking strategy for the two multi-row transitions:
//! `assign_ride_atomic` takes the driver row with `FOR UPDATE SKIP LOCKED`
//! (a contending worker fails fast instead of queueing) and the ride row with
//! `FOR UPDATE`; `end_trip` locks the trip row. All writes of a transition
//! commit in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::{
    DriverId, DriverRecord, DriverStatus, GeoPoint, PaymentId, PaymentMethod, PaymentRecord,
    PaymentStatus, RideId, RideRecord, RideStatus, Tier, TripId, TripRecord, TripStatus,
};
use crate::error::{DispatchError, Result};

use super::{
    AssignOutcome, IdempotencyRecord, LocationSample, NewDriver, NewRide, StateStore,
};

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a small pool sized for the dispatch workers.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Row types
// ============================================================================

#[derive(sqlx::FromRow)]
struct DriverRow {
    id: Uuid,
    name: String,
    phone: String,
    tier: String,
    status: String,
    last_lat: Option<f64>,
    last_lng: Option<f64>,
    last_seen_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct RideRow {
    id: Uuid,
    rider_id: String,
    pickup_lat: f64,
    pickup_lng: f64,
    dest_lat: f64,
    dest_lng: f64,
    tier: String,
    payment_method: String,
    status: String,
    assigned_driver_id: Option<Uuid>,
    estimated_fare: f64,
    surge_multiplier: f64,
    cancel_reason: Option<String>,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct TripRow {
    id: Uuid,
    ride_id: Uuid,
    driver_id: Uuid,
    rider_id: String,
    started_at: DateTime<Utc>,
    driver_confirmed_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    final_lat: Option<f64>,
    final_lng: Option<f64>,
    distance_km: Option<f64>,
    final_fare: Option<f64>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    trip_id: Uuid,
    amount: f64,
    method: String,
    status: String,
    psp_ref: Option<String>,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct IdempotencyRow {
    endpoint: String,
    subject_id: String,
    key: String,
    request_fingerprint: String,
    status_code: i32,
    response_body: String,
    created_at: DateTime<Utc>,
}

fn corrupt_column(column: &str, value: &str) -> DispatchError {
    DispatchError::Unavailable {
        dependency: "state store",
        details: format!("unexpected {column} value '{value}'"),
    }
}

impl TryFrom<DriverRow> for DriverRecord {
    type Error = DispatchError;

    fn try_from(row: DriverRow) -> Result<Self> {
        Ok(DriverRecord {
            id: row.id,
            tier: Tier::parse(&row.tier).ok_or_else(|| corrupt_column("tier", &row.tier))?,
            status: DriverStatus::parse(&row.status)
                .ok_or_else(|| corrupt_column("status", &row.status))?,
            name: row.name,
            phone: row.phone,
            last_lat: row.last_lat,
            last_lng: row.last_lng,
            last_seen_at: row.last_seen_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<RideRow> for RideRecord {
    type Error = DispatchError;

    fn try_from(row: RideRow) -> Result<Self> {
        Ok(RideRecord {
            id: row.id,
            tier: Tier::parse(&row.tier).ok_or_else(|| corrupt_column("tier", &row.tier))?,
            payment_method: PaymentMethod::parse(&row.payment_method)
                .ok_or_else(|| corrupt_column("payment_method", &row.payment_method))?,
            status: RideStatus::parse(&row.status)
                .ok_or_else(|| corrupt_column("status", &row.status))?,
            rider_id: row.rider_id,
            pickup_lat: row.pickup_lat,
            pickup_lng: row.pickup_lng,
            dest_lat: row.dest_lat,
            dest_lng: row.dest_lng,
            assigned_driver_id: row.assigned_driver_id,
            estimated_fare: row.estimated_fare,
            surge_multiplier: row.surge_multiplier,
            cancel_reason: row.cancel_reason,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<TripRow> for TripRecord {
    type Error = DispatchError;

    fn try_from(row: TripRow) -> Result<Self> {
        Ok(TripRecord {
            id: row.id,
            status: TripStatus::parse(&row.status)
                .ok_or_else(|| corrupt_column("status", &row.status))?,
            ride_id: row.ride_id,
            driver_id: row.driver_id,
            rider_id: row.rider_id,
            started_at: row.started_at,
            driver_confirmed_at: row.driver_confirmed_at,
            ended_at: row.ended_at,
            final_lat: row.final_lat,
            final_lng: row.final_lng,
            distance_km: row.distance_km,
            final_fare: row.final_fare,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = DispatchError;

    fn try_from(row: PaymentRow) -> Result<Self> {
        Ok(PaymentRecord {
            id: row.id,
            method: PaymentMethod::parse(&row.method)
                .ok_or_else(|| corrupt_column("method", &row.method))?,
            status: PaymentStatus::parse(&row.status)
                .ok_or_else(|| corrupt_column("status", &row.status))?,
            trip_id: row.trip_id,
            amount: row.amount,
            psp_ref: row.psp_ref,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<IdempotencyRow> for IdempotencyRecord {
    fn from(row: IdempotencyRow) -> Self {
        IdempotencyRecord {
            endpoint: row.endpoint,
            subject_id: row.subject_id,
            key: row.key,
            request_fingerprint: row.request_fingerprint,
            status_code: row.status_code as u16,
            response_body: row.response_body,
            created_at: row.created_at,
        }
    }
}

const DRIVER_COLUMNS: &str =
    "id, name, phone, tier, status, last_lat, last_lng, last_seen_at, created_at, updated_at";
const RIDE_COLUMNS: &str = "id, rider_id, pickup_lat, pickup_lng, dest_lat, dest_lng, tier, \
     payment_method, status, assigned_driver_id, estimated_fare, surge_multiplier, \
     cancel_reason, idempotency_key, created_at, updated_at";
const TRIP_COLUMNS: &str = "id, ride_id, driver_id, rider_id, started_at, driver_confirmed_at, \
     ended_at, final_lat, final_lng, distance_km, final_fare, status, created_at, updated_at";
const PAYMENT_COLUMNS: &str =
    "id, trip_id, amount, method, status, psp_ref, idempotency_key, created_at, updated_at";

// ============================================================================
// StateStore implementation
// ============================================================================

#[async_trait]
impl StateStore for PostgresStore {
    async fn create_driver(&self, new: NewDriver) -> Result<DriverRecord> {
        let id = Uuid::new_v4();
        let row = sqlx::query_as::<_, DriverRow>(&format!(
            r#"
            INSERT INTO drivers (id, name, phone, tier, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'offline', NOW(), NOW())
            RETURNING {DRIVER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&new.name)
        .bind(&new.phone)
        .bind(new.tier.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            if err
                .as_database_error()
                .is_some_and(|db| db.is_unique_violation())
            {
                DispatchError::conflict(format!("phone '{}' is already registered", new.phone))
            } else {
                err.into()
            }
        })?;
        row.try_into()
    }

    async fn get_driver(&self, id: DriverId) -> Result<Option<DriverRecord>> {
        let row = sqlx::query_as::<_, DriverRow>(&format!(
            "SELECT {DRIVER_COLUMNS} FROM drivers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn set_driver_status(&self, id: DriverId, status: DriverStatus) -> Result<DriverRecord> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, DriverRow>(&format!(
            "SELECT {DRIVER_COLUMNS} FROM drivers WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DispatchError::not_found("driver", id))?;

        let current = DriverStatus::parse(&row.status)
            .ok_or_else(|| corrupt_column("status", &row.status))?;
        if current == DriverStatus::OnTrip && status != DriverStatus::OnTrip {
            return Err(DispatchError::conflict(
                "driver is on a trip; status is released when the trip ends",
            ));
        }

        let updated = sqlx::query_as::<_, DriverRow>(&format!(
            r#"
            UPDATE drivers SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {DRIVER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status.as_str())
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        updated.try_into()
    }

    async fn update_driver_locations(&self, batch: &[LocationSample]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = batch.iter().map(|s| s.driver_id).collect();
        let lats: Vec<f64> = batch.iter().map(|s| s.lat).collect();
        let lngs: Vec<f64> = batch.iter().map(|s| s.lng).collect();
        let seen: Vec<DateTime<Utc>> = batch.iter().map(|s| s.recorded_at).collect();

        sqlx::query(
            r#"
            UPDATE drivers AS d
            SET last_lat = u.lat, last_lng = u.lng, last_seen_at = u.seen_at,
                updated_at = NOW()
            FROM UNNEST($1::uuid[], $2::float8[], $3::float8[], $4::timestamptz[])
                 AS u(id, lat, lng, seen_at)
            WHERE d.id = u.id
            "#,
        )
        .bind(&ids)
        .bind(&lats)
        .bind(&lngs)
        .bind(&seen)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_ride(&self, new: NewRide) -> Result<RideRecord> {
        let id = Uuid::new_v4();
        let row = sqlx::query_as::<_, RideRow>(&format!(
            r#"
            INSERT INTO rides (id, rider_id, pickup_lat, pickup_lng, dest_lat, dest_lng,
                               tier, payment_method, status, estimated_fare,
                               surge_multiplier, idempotency_key, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'REQUESTED', $9, $10, $11, NOW(), NOW())
            RETURNING {RIDE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&new.rider_id)
        .bind(new.pickup.lat)
        .bind(new.pickup.lng)
        .bind(new.dest.lat)
        .bind(new.dest.lng)
        .bind(new.tier.as_str())
        .bind(new.payment_method.as_str())
        .bind(new.estimated_fare)
        .bind(new.surge_multiplier)
        .bind(&new.idempotency_key)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get_ride(&self, id: RideId) -> Result<Option<RideRecord>> {
        let row = sqlx::query_as::<_, RideRow>(&format!(
            "SELECT {RIDE_COLUMNS} FROM rides WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn assign_ride_atomic(
        &self,
        ride_id: RideId,
        driver_id: DriverId,
    ) -> Result<AssignOutcome> {
        let mut tx = self.pool.begin().await?;

        // Skip-locked: a contending matcher sees "no row" instead of queueing.
        let driver = sqlx::query_as::<_, (Uuid,)>(
            r#"
            SELECT id FROM drivers
            WHERE id = $1 AND status = 'available'
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(driver_id)
        .fetch_optional(&mut *tx)
        .await?;
        if driver.is_none() {
            return Ok(AssignOutcome::DriverConflict);
        }

        let ride = sqlx::query_as::<_, (Uuid, String)>(
            r#"
            SELECT id, rider_id FROM rides
            WHERE id = $1 AND status = 'REQUESTED'
            FOR UPDATE
            "#,
        )
        .bind(ride_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((_, rider_id)) = ride else {
            return Ok(AssignOutcome::RideConflict);
        };

        sqlx::query(
            r#"
            UPDATE rides
            SET status = 'MATCHED', assigned_driver_id = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(ride_id)
        .bind(driver_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE drivers SET status = 'on_trip', updated_at = NOW() WHERE id = $1")
            .bind(driver_id)
            .execute(&mut *tx)
            .await?;

        let trip_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO trips (id, ride_id, driver_id, rider_id, started_at, status,
                               created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), 'active', NOW(), NOW())
            "#,
        )
        .bind(trip_id)
        .bind(ride_id)
        .bind(driver_id)
        .bind(&rider_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(AssignOutcome::Assigned { trip_id })
    }

    async fn start_trip(&self, ride_id: RideId) -> Result<RideRecord> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, RideRow>(&format!(
            "SELECT {RIDE_COLUMNS} FROM rides WHERE id = $1 FOR UPDATE"
        ))
        .bind(ride_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DispatchError::not_found("ride", ride_id))?;
        if row.status != RideStatus::Matched.as_str() {
            return Err(DispatchError::conflict(format!(
                "ride is {}, expected MATCHED",
                row.status
            )));
        }

        let updated = sqlx::query_as::<_, RideRow>(&format!(
            r#"
            UPDATE rides SET status = 'STARTED', updated_at = NOW()
            WHERE id = $1
            RETURNING {RIDE_COLUMNS}
            "#
        ))
        .bind(ride_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        updated.try_into()
    }

    async fn confirm_trip(
        &self,
        ride_id: RideId,
        driver_id: DriverId,
        at: DateTime<Utc>,
    ) -> Result<TripRecord> {
        let mut tx = self.pool.begin().await?;
        let ride = sqlx::query_as::<_, (String, Option<Uuid>)>(
            "SELECT status, assigned_driver_id FROM rides WHERE id = $1 FOR UPDATE",
        )
        .bind(ride_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DispatchError::not_found("ride", ride_id))?;
        if ride.0 != RideStatus::Matched.as_str() || ride.1 != Some(driver_id) {
            return Err(DispatchError::conflict(
                "ride is not awaiting confirmation by this driver",
            ));
        }

        let row = sqlx::query_as::<_, TripRow>(&format!(
            r#"
            UPDATE trips
            SET driver_confirmed_at = COALESCE(driver_confirmed_at, $2), updated_at = NOW()
            WHERE ride_id = $1
            RETURNING {TRIP_COLUMNS}
            "#
        ))
        .bind(ride_id)
        .bind(at)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DispatchError::not_found("trip", ride_id))?;
        tx.commit().await?;
        row.try_into()
    }

    async fn cancel_ride(&self, ride_id: RideId, reason: &str) -> Result<RideRecord> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT status FROM rides WHERE id = $1 FOR UPDATE",
        )
        .bind(ride_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DispatchError::not_found("ride", ride_id))?;
        let status = RideStatus::parse(&row.0).ok_or_else(|| corrupt_column("status", &row.0))?;
        if !matches!(status, RideStatus::Requested | RideStatus::Matched) {
            return Err(DispatchError::conflict(format!(
                "ride is {status} and can no longer be cancelled"
            )));
        }

        let updated = sqlx::query_as::<_, RideRow>(&format!(
            r#"
            UPDATE rides
            SET status = 'CANCELLED', cancel_reason = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {RIDE_COLUMNS}
            "#
        ))
        .bind(ride_id)
        .bind(reason)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        updated.try_into()
    }

    async fn get_trip(&self, id: TripId) -> Result<Option<TripRecord>> {
        let row = sqlx::query_as::<_, TripRow>(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_trip_by_ride(&self, ride_id: RideId) -> Result<Option<TripRecord>> {
        let row = sqlx::query_as::<_, TripRow>(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips WHERE ride_id = $1"
        ))
        .bind(ride_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn end_trip(
        &self,
        trip_id: TripId,
        final_point: GeoPoint,
        distance_km: f64,
        final_fare: f64,
    ) -> Result<PaymentRecord> {
        let mut tx = self.pool.begin().await?;
        let trip = sqlx::query_as::<_, TripRow>(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips WHERE id = $1 FOR UPDATE"
        ))
        .bind(trip_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DispatchError::not_found("trip", trip_id))?;
        if trip.status != TripStatus::Active.as_str() {
            return Err(DispatchError::conflict("trip is already completed"));
        }

        let payment_method = sqlx::query_as::<_, (String,)>(
            "SELECT payment_method FROM rides WHERE id = $1 FOR UPDATE",
        )
        .bind(trip.ride_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DispatchError::not_found("ride", trip.ride_id))?
        .0;

        sqlx::query(
            r#"
            UPDATE trips
            SET status = 'completed', ended_at = NOW(), final_lat = $2, final_lng = $3,
                distance_km = $4, final_fare = $5, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(trip_id)
        .bind(final_point.lat)
        .bind(final_point.lng)
        .bind(distance_km)
        .bind(final_fare)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE rides SET status = 'COMPLETED', updated_at = NOW() WHERE id = $1")
            .bind(trip.ride_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE drivers
            SET status = 'available', last_lat = $2, last_lng = $3, last_seen_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(trip.driver_id)
        .bind(final_point.lat)
        .bind(final_point.lng)
        .execute(&mut *tx)
        .await?;

        let payment = sqlx::query_as::<_, PaymentRow>(&format!(
            r#"
            INSERT INTO payments (id, trip_id, amount, method, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'pending', NOW(), NOW())
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(trip_id)
        .bind(final_fare)
        .bind(&payment_method)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        payment.try_into()
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<PaymentRecord>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_payment_by_trip(&self, trip_id: TripId) -> Result<Option<PaymentRecord>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE trip_id = $1"
        ))
        .bind(trip_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn finalize_payment(
        &self,
        id: PaymentId,
        outcome: PaymentStatus,
        psp_ref: Option<String>,
    ) -> Result<PaymentRecord> {
        if !outcome.is_terminal() {
            return Err(DispatchError::validation(
                "outcome",
                "finalize requires a terminal payment status",
            ));
        }
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DispatchError::not_found("payment", id))?;

        let current = PaymentStatus::parse(&row.status)
            .ok_or_else(|| corrupt_column("status", &row.status))?;
        match current {
            PaymentStatus::Pending => {
                let updated = sqlx::query_as::<_, PaymentRow>(&format!(
                    r#"
                    UPDATE payments
                    SET status = $2, psp_ref = $3, updated_at = NOW()
                    WHERE id = $1
                    RETURNING {PAYMENT_COLUMNS}
                    "#
                ))
                .bind(id)
                .bind(outcome.as_str())
                .bind(&psp_ref)
                .fetch_one(&mut *tx)
                .await?;
                tx.commit().await?;
                updated.try_into()
            }
            current if current == outcome => row.try_into(),
            current => Err(DispatchError::conflict(format!(
                "payment is already {}",
                current.as_str()
            ))),
        }
    }

    async fn save_idempotency(&self, record: &IdempotencyRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO idempotency (endpoint, subject_id, key, request_fingerprint,
                                     status_code, response_body, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (endpoint, subject_id, key) DO UPDATE
            SET request_fingerprint = EXCLUDED.request_fingerprint,
                status_code = EXCLUDED.status_code,
                response_body = EXCLUDED.response_body,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(&record.endpoint)
        .bind(&record.subject_id)
        .bind(&record.key)
        .bind(&record.request_fingerprint)
        .bind(record.status_code as i32)
        .bind(&record.response_body)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_idempotency(
        &self,
        endpoint: &str,
        subject_id: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query_as::<_, IdempotencyRow>(
            r#"
            SELECT endpoint, subject_id, key, request_fingerprint, status_code,
                   response_body, created_at
            FROM idempotency
            WHERE endpoint = $1 AND subject_id = $2 AND key = $3
            "#,
        )
        .bind(endpoint)
        .bind(subject_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }
}

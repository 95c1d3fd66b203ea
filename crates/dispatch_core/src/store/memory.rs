//! In-memory store with the same transition semantics as the Postgres
//! backend. Every multi-row transition runs under one state mutex, which makes
//! it atomic with respect to all other store calls.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entities::{
    DriverId, DriverRecord, DriverStatus, GeoPoint, PaymentId, PaymentRecord, PaymentStatus,
    RideId, RideRecord, RideStatus, TripId, TripRecord, TripStatus,
};
use crate::error::{DispatchError, Result};

use super::{
    AssignOutcome, IdempotencyRecord, LocationSample, NewDriver, NewRide, StateStore,
};

#[derive(Debug, Default)]
struct State {
    drivers: HashMap<DriverId, DriverRecord>,
    phone_index: HashMap<String, DriverId>,
    rides: HashMap<RideId, RideRecord>,
    trips: HashMap<TripId, TripRecord>,
    trips_by_ride: HashMap<RideId, TripId>,
    payments: HashMap<PaymentId, PaymentRecord>,
    payments_by_trip: HashMap<TripId, PaymentId>,
    idempotency: HashMap<(String, String, String), IdempotencyRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn create_driver(&self, new: NewDriver) -> Result<DriverRecord> {
        let mut state = self.lock();
        if state.phone_index.contains_key(&new.phone) {
            return Err(DispatchError::conflict(format!(
                "phone '{}' is already registered",
                new.phone
            )));
        }
        let now = Utc::now();
        let record = DriverRecord {
            id: Uuid::new_v4(),
            name: new.name,
            phone: new.phone,
            tier: new.tier,
            status: DriverStatus::Offline,
            last_lat: None,
            last_lng: None,
            last_seen_at: None,
            created_at: now,
            updated_at: now,
        };
        state.phone_index.insert(record.phone.clone(), record.id);
        state.drivers.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_driver(&self, id: DriverId) -> Result<Option<DriverRecord>> {
        Ok(self.lock().drivers.get(&id).cloned())
    }

    async fn set_driver_status(&self, id: DriverId, status: DriverStatus) -> Result<DriverRecord> {
        let mut state = self.lock();
        let driver = state
            .drivers
            .get_mut(&id)
            .ok_or_else(|| DispatchError::not_found("driver", id))?;
        if driver.status == DriverStatus::OnTrip && status != DriverStatus::OnTrip {
            return Err(DispatchError::conflict(
                "driver is on a trip; status is released when the trip ends",
            ));
        }
        driver.status = status;
        driver.updated_at = Utc::now();
        Ok(driver.clone())
    }

    async fn update_driver_locations(&self, batch: &[LocationSample]) -> Result<()> {
        let mut state = self.lock();
        let now = Utc::now();
        for sample in batch {
            if let Some(driver) = state.drivers.get_mut(&sample.driver_id) {
                driver.last_lat = Some(sample.lat);
                driver.last_lng = Some(sample.lng);
                driver.last_seen_at = Some(sample.recorded_at);
                driver.updated_at = now;
            }
        }
        Ok(())
    }

    async fn create_ride(&self, new: NewRide) -> Result<RideRecord> {
        let mut state = self.lock();
        let now = Utc::now();
        let record = RideRecord {
            id: Uuid::new_v4(),
            rider_id: new.rider_id,
            pickup_lat: new.pickup.lat,
            pickup_lng: new.pickup.lng,
            dest_lat: new.dest.lat,
            dest_lng: new.dest.lng,
            tier: new.tier,
            payment_method: new.payment_method,
            status: RideStatus::Requested,
            assigned_driver_id: None,
            estimated_fare: new.estimated_fare,
            surge_multiplier: new.surge_multiplier,
            cancel_reason: None,
            idempotency_key: new.idempotency_key,
            created_at: now,
            updated_at: now,
        };
        state.rides.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_ride(&self, id: RideId) -> Result<Option<RideRecord>> {
        Ok(self.lock().rides.get(&id).cloned())
    }

    async fn assign_ride_atomic(
        &self,
        ride_id: RideId,
        driver_id: DriverId,
    ) -> Result<AssignOutcome> {
        let mut state = self.lock();

        let driver_ok = state
            .drivers
            .get(&driver_id)
            .is_some_and(|d| d.status == DriverStatus::Available);
        if !driver_ok {
            return Ok(AssignOutcome::DriverConflict);
        }
        let ride_ok = state
            .rides
            .get(&ride_id)
            .is_some_and(|r| r.status == RideStatus::Requested);
        if !ride_ok {
            return Ok(AssignOutcome::RideConflict);
        }

        let now = Utc::now();
        let rider_id = {
            let ride = state.rides.get_mut(&ride_id).expect("ride checked above");
            ride.status = RideStatus::Matched;
            ride.assigned_driver_id = Some(driver_id);
            ride.updated_at = now;
            ride.rider_id.clone()
        };
        {
            let driver = state.drivers.get_mut(&driver_id).expect("driver checked above");
            driver.status = DriverStatus::OnTrip;
            driver.updated_at = now;
        }
        let trip = TripRecord {
            id: Uuid::new_v4(),
            ride_id,
            driver_id,
            rider_id,
            started_at: now,
            driver_confirmed_at: None,
            ended_at: None,
            final_lat: None,
            final_lng: None,
            distance_km: None,
            final_fare: None,
            status: TripStatus::Active,
            created_at: now,
            updated_at: now,
        };
        let trip_id = trip.id;
        state.trips_by_ride.insert(ride_id, trip_id);
        state.trips.insert(trip_id, trip);
        Ok(AssignOutcome::Assigned { trip_id })
    }

    async fn start_trip(&self, ride_id: RideId) -> Result<RideRecord> {
        let mut state = self.lock();
        let ride = state
            .rides
            .get_mut(&ride_id)
            .ok_or_else(|| DispatchError::not_found("ride", ride_id))?;
        if ride.status != RideStatus::Matched {
            return Err(DispatchError::conflict(format!(
                "ride is {}, expected MATCHED",
                ride.status
            )));
        }
        ride.status = RideStatus::Started;
        ride.updated_at = Utc::now();
        Ok(ride.clone())
    }

    async fn confirm_trip(
        &self,
        ride_id: RideId,
        driver_id: DriverId,
        at: DateTime<Utc>,
    ) -> Result<TripRecord> {
        let mut state = self.lock();
        let ride = state
            .rides
            .get(&ride_id)
            .ok_or_else(|| DispatchError::not_found("ride", ride_id))?;
        if ride.status != RideStatus::Matched || ride.assigned_driver_id != Some(driver_id) {
            return Err(DispatchError::conflict(
                "ride is not awaiting confirmation by this driver",
            ));
        }
        let trip_id = *state
            .trips_by_ride
            .get(&ride_id)
            .ok_or_else(|| DispatchError::not_found("trip", ride_id))?;
        let trip = state.trips.get_mut(&trip_id).expect("trip indexed by ride");
        if trip.driver_confirmed_at.is_none() {
            trip.driver_confirmed_at = Some(at);
            trip.updated_at = Utc::now();
        }
        Ok(trip.clone())
    }

    async fn cancel_ride(&self, ride_id: RideId, reason: &str) -> Result<RideRecord> {
        let mut state = self.lock();
        let ride = state
            .rides
            .get_mut(&ride_id)
            .ok_or_else(|| DispatchError::not_found("ride", ride_id))?;
        match ride.status {
            RideStatus::Requested | RideStatus::Matched => {
                ride.status = RideStatus::Cancelled;
                ride.cancel_reason = Some(reason.to_string());
                ride.updated_at = Utc::now();
                Ok(ride.clone())
            }
            status => Err(DispatchError::conflict(format!(
                "ride is {status} and can no longer be cancelled"
            ))),
        }
    }

    async fn get_trip(&self, id: TripId) -> Result<Option<TripRecord>> {
        Ok(self.lock().trips.get(&id).cloned())
    }

    async fn get_trip_by_ride(&self, ride_id: RideId) -> Result<Option<TripRecord>> {
        let state = self.lock();
        Ok(state
            .trips_by_ride
            .get(&ride_id)
            .and_then(|trip_id| state.trips.get(trip_id))
            .cloned())
    }

    async fn end_trip(
        &self,
        trip_id: TripId,
        final_point: GeoPoint,
        distance_km: f64,
        final_fare: f64,
    ) -> Result<PaymentRecord> {
        let mut state = self.lock();
        let trip = state
            .trips
            .get(&trip_id)
            .ok_or_else(|| DispatchError::not_found("trip", trip_id))?;
        if trip.status != TripStatus::Active {
            return Err(DispatchError::conflict("trip is already completed"));
        }
        let ride_id = trip.ride_id;
        let driver_id = trip.driver_id;
        let payment_method = state
            .rides
            .get(&ride_id)
            .map(|r| r.payment_method)
            .ok_or_else(|| DispatchError::not_found("ride", ride_id))?;

        let now = Utc::now();
        {
            let trip = state.trips.get_mut(&trip_id).expect("trip checked above");
            trip.status = TripStatus::Completed;
            trip.ended_at = Some(now);
            trip.final_lat = Some(final_point.lat);
            trip.final_lng = Some(final_point.lng);
            trip.distance_km = Some(distance_km);
            trip.final_fare = Some(final_fare);
            trip.updated_at = now;
        }
        if let Some(ride) = state.rides.get_mut(&ride_id) {
            ride.status = RideStatus::Completed;
            ride.updated_at = now;
        }
        if let Some(driver) = state.drivers.get_mut(&driver_id) {
            driver.status = DriverStatus::Available;
            driver.last_lat = Some(final_point.lat);
            driver.last_lng = Some(final_point.lng);
            driver.last_seen_at = Some(now);
            driver.updated_at = now;
        }

        let payment = PaymentRecord {
            id: Uuid::new_v4(),
            trip_id,
            amount: final_fare,
            method: payment_method,
            status: PaymentStatus::Pending,
            psp_ref: None,
            idempotency_key: None,
            created_at: now,
            updated_at: now,
        };
        state.payments_by_trip.insert(trip_id, payment.id);
        state.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<PaymentRecord>> {
        Ok(self.lock().payments.get(&id).cloned())
    }

    async fn get_payment_by_trip(&self, trip_id: TripId) -> Result<Option<PaymentRecord>> {
        let state = self.lock();
        Ok(state
            .payments_by_trip
            .get(&trip_id)
            .and_then(|id| state.payments.get(id))
            .cloned())
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
        let mut state = self.lock();
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| DispatchError::not_found("payment", id))?;
        match payment.status {
            PaymentStatus::Pending => {
                payment.status = outcome;
                payment.psp_ref = psp_ref;
                payment.updated_at = Utc::now();
                Ok(payment.clone())
            }
            current if current == outcome => Ok(payment.clone()),
            current => Err(DispatchError::conflict(format!(
                "payment is already {}",
                current.as_str()
            ))),
        }
    }

    async fn save_idempotency(&self, record: &IdempotencyRecord) -> Result<()> {
        let key = (
            record.endpoint.clone(),
            record.subject_id.clone(),
            record.key.clone(),
        );
        self.lock().idempotency.insert(key, record.clone());
        Ok(())
    }

    async fn load_idempotency(
        &self,
        endpoint: &str,
        subject_id: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        let lookup = (
            endpoint.to_string(),
            subject_id.to_string(),
            key.to_string(),
        );
        Ok(self.lock().idempotency.get(&lookup).cloned())
    }
}

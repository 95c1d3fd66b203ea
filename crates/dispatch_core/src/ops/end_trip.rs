//! Trip completion: compute the great-circle distance from pickup to the
//! drop-off point, derive the fare at the ride's frozen surge multiplier, and
//! commit trip/ride/driver/payment in one store transaction.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::engine::EngineInner;
use crate::entities::{GeoPoint, PaymentId, PaymentStatus, TripId, TripStatus};
use crate::error::{DispatchError, Result};
use crate::ops::{check_lat, check_lng};
use crate::pipeline::{Handler, RequestContext, Response};
use crate::pricing::{calculate_fare, round3};
use crate::spatial::haversine_km;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndTripRequest {
    pub trip_id: TripId,
    pub final_lat: f64,
    pub final_lng: f64,
}

impl EndTripRequest {
    pub fn validate(&self) -> Result<()> {
        check_lat("final_lat", self.final_lat)?;
        check_lng("final_lng", self.final_lng)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndTripResponse {
    pub trip_id: TripId,
    pub distance_km: f64,
    pub final_fare: f64,
    pub payment_id: PaymentId,
    pub payment_status: PaymentStatus,
}

pub struct EndTrip {
    pub(crate) inner: Arc<EngineInner>,
}

#[async_trait]
impl Handler for EndTrip {
    async fn call(&self, ctx: &RequestContext) -> Result<Response> {
        let subject = ctx.require_role(Role::Driver)?;
        let request: EndTripRequest = ctx.parse_body()?;
        request.validate()?;

        let trip = self
            .inner
            .store_call(self.inner.store.get_trip(request.trip_id))
            .await?
            .ok_or_else(|| DispatchError::not_found("trip", request.trip_id))?;
        if trip.driver_id.to_string() != subject.id {
            return Err(DispatchError::Unauthorized(
                "trip belongs to another driver".into(),
            ));
        }
        if trip.status != TripStatus::Active {
            return Err(DispatchError::conflict("trip is already completed"));
        }

        let ride = self
            .inner
            .store_call(self.inner.store.get_ride(trip.ride_id))
            .await?
            .ok_or_else(|| DispatchError::not_found("ride", trip.ride_id))?;

        let final_point = GeoPoint::new(request.final_lat, request.final_lng);
        let distance_km = round3(haversine_km(ride.pickup(), final_point));
        let final_fare = calculate_fare(
            &self.inner.config.fares,
            ride.tier,
            distance_km,
            ride.surge_multiplier,
        );

        let payment = self
            .inner
            .store_call(self.inner.store.end_trip(
                request.trip_id,
                final_point,
                distance_km,
                final_fare,
            ))
            .await?;

        // Driver is available again at the drop-off point.
        self.inner
            .geo
            .upsert(ride.tier, trip.driver_id, final_point)?;
        self.inner.ingest.invalidate_directory(trip.driver_id);
        self.inner.status_cache.invalidate(ride.id);
        tracing::info!(
            trip_id = %trip.id,
            ride_id = %ride.id,
            distance_km,
            final_fare,
            "trip completed"
        );

        Response::json(
            200,
            &EndTripResponse {
                trip_id: trip.id,
                distance_km,
                final_fare,
                payment_id: payment.id,
                payment_status: payment.status,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn coordinates_validated() {
        let ok = EndTripRequest {
            trip_id: Uuid::new_v4(),
            final_lat: 13.0827,
            final_lng: 80.2707,
        };
        assert!(ok.validate().is_ok());
        assert!(EndTripRequest {
            final_lat: 120.0,
            ..ok
        }
        .validate()
        .is_err());
    }
}

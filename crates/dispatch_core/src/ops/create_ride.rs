//! Ride creation: price the request (surge captured here, frozen for the
//! trip), persist `REQUESTED`, bump the demand counter, and hand the ride to
//! the matching worker.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::engine::EngineInner;
use crate::entities::{GeoPoint, PaymentMethod, RideId, RideStatus, Tier};
use crate::error::Result;
use crate::matching::MatchRequest;
use crate::ops::{check_lat, check_lng};
use crate::pipeline::{Handler, RequestContext, Response};
use crate::pricing::calculate_fare;
use crate::spatial::haversine_km;
use crate::store::NewRide;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRideRequest {
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub dest_lat: f64,
    pub dest_lng: f64,
    pub tier: Tier,
    pub payment_method: PaymentMethod,
}

impl CreateRideRequest {
    pub fn validate(&self) -> Result<()> {
        check_lat("pickup_lat", self.pickup_lat)?;
        check_lng("pickup_lng", self.pickup_lng)?;
        check_lat("dest_lat", self.dest_lat)?;
        check_lng("dest_lng", self.dest_lng)
    }

    pub fn pickup(&self) -> GeoPoint {
        GeoPoint::new(self.pickup_lat, self.pickup_lng)
    }

    pub fn dest(&self) -> GeoPoint {
        GeoPoint::new(self.dest_lat, self.dest_lng)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRideResponse {
    pub ride_id: RideId,
    pub status: RideStatus,
    pub estimated_fare: f64,
    pub surge_multiplier: f64,
    pub created_at: DateTime<Utc>,
}

pub struct CreateRide {
    pub(crate) inner: Arc<EngineInner>,
}

#[async_trait]
impl Handler for CreateRide {
    async fn call(&self, ctx: &RequestContext) -> Result<Response> {
        let subject = ctx.require_role(Role::Rider)?;
        let request: CreateRideRequest = ctx.parse_body()?;
        request.validate()?;

        let pickup = request.pickup();
        let dest = request.dest();
        let surge = self.inner.surge.multiplier_at(pickup)?;
        let distance_km = haversine_km(pickup, dest);
        let estimated_fare =
            calculate_fare(&self.inner.config.fares, request.tier, distance_km, surge);

        let ride = self
            .inner
            .store_call(self.inner.store.create_ride(NewRide {
                rider_id: subject.id.clone(),
                pickup,
                dest,
                tier: request.tier,
                payment_method: request.payment_method,
                estimated_fare,
                surge_multiplier: surge,
                idempotency_key: ctx.client_key.clone(),
            }))
            .await?;

        self.inner.surge.record_demand(pickup)?;
        self.inner
            .enqueue_match(MatchRequest {
                ride_id: ride.id,
                pickup,
                tier: ride.tier,
            })
            .await?;
        tracing::info!(
            ride_id = %ride.id,
            tier = %ride.tier,
            surge,
            estimated_fare,
            "ride requested"
        );

        Response::json(
            201,
            &CreateRideResponse {
                ride_id: ride.id,
                status: ride.status,
                estimated_fare: ride.estimated_fare,
                surge_multiplier: ride.surge_multiplier,
                created_at: ride.created_at,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_covers_all_coordinates() {
        let ok = CreateRideRequest {
            pickup_lat: 12.9716,
            pickup_lng: 77.5946,
            dest_lat: 13.0827,
            dest_lng: 80.2707,
            tier: Tier::Standard,
            payment_method: PaymentMethod::Card,
        };
        assert!(ok.validate().is_ok());
        assert!(CreateRideRequest {
            dest_lng: 181.0,
            ..ok.clone()
        }
        .validate()
        .is_err());
        assert!(CreateRideRequest {
            pickup_lat: -91.0,
            ..ok
        }
        .validate()
        .is_err());
    }
}

//! Driver confirmation of an assignment. Matching already committed the
//! status transitions; this stamps `driver_confirmed_at` and releases the
//! allocation lock early (otherwise it lapses on TTL).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::engine::EngineInner;
use crate::entities::{DriverId, RideId, TripId};
use crate::error::{DispatchError, Result};
use crate::pipeline::{Handler, RequestContext, Response};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptRideRequest {
    pub driver_id: DriverId,
    pub ride_id: RideId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptRideResponse {
    pub trip_id: TripId,
    pub driver_confirmed_at: Option<DateTime<Utc>>,
}

pub struct AcceptRide {
    pub(crate) inner: Arc<EngineInner>,
}

#[async_trait]
impl Handler for AcceptRide {
    async fn call(&self, ctx: &RequestContext) -> Result<Response> {
        let subject = ctx.require_role(Role::Driver)?;
        let request: AcceptRideRequest = ctx.parse_body()?;
        if subject.id != request.driver_id.to_string() {
            return Err(DispatchError::Unauthorized(
                "cannot accept a ride for another driver".into(),
            ));
        }

        let trip = self
            .inner
            .store_call(self.inner.store.confirm_trip(
                request.ride_id,
                request.driver_id,
                Utc::now(),
            ))
            .await?;
        self.inner.locks.release(request.driver_id, request.ride_id);
        tracing::info!(
            ride_id = %request.ride_id,
            driver_id = %request.driver_id,
            "driver confirmed assignment"
        );

        Response::json(
            200,
            &AcceptRideResponse {
                trip_id: trip.id,
                driver_confirmed_at: trip.driver_confirmed_at,
            },
        )
    }
}

//! Arrival signal: the assigned driver reports pickup, moving the ride
//! `MATCHED → STARTED`. Deployments without an arrival signal may skip this;
//! `end_trip` tolerates rides still in `MATCHED`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::engine::EngineInner;
use crate::entities::{RideId, RideStatus};
use crate::error::{DispatchError, Result};
use crate::pipeline::{Handler, RequestContext, Response};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartTripRequest {
    pub ride_id: RideId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartTripResponse {
    pub ride_id: RideId,
    pub status: RideStatus,
}

pub struct StartTrip {
    pub(crate) inner: Arc<EngineInner>,
}

#[async_trait]
impl Handler for StartTrip {
    async fn call(&self, ctx: &RequestContext) -> Result<Response> {
        let subject = ctx.require_role(Role::Driver)?;
        let request: StartTripRequest = ctx.parse_body()?;

        let ride = self
            .inner
            .store_call(self.inner.store.get_ride(request.ride_id))
            .await?
            .ok_or_else(|| DispatchError::not_found("ride", request.ride_id))?;
        let assigned = ride
            .assigned_driver_id
            .is_some_and(|id| id.to_string() == subject.id);
        if !assigned {
            return Err(DispatchError::conflict(
                "ride is not assigned to this driver",
            ));
        }

        let ride = self
            .inner
            .store_call(self.inner.store.start_trip(request.ride_id))
            .await?;
        self.inner.status_cache.invalidate(ride.id);
        tracing::info!(ride_id = %ride.id, "trip started");

        Response::json(
            200,
            &StartTripResponse {
                ride_id: ride.id,
                status: ride.status,
            },
        )
    }
}

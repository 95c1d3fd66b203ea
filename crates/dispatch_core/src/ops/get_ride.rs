//! Ride snapshot reads, cache-aside over the state store. Visible to the
//! requesting rider and the assigned driver only.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::engine::EngineInner;
use crate::entities::{DriverBrief, RideId, RideSnapshot};
use crate::error::{DispatchError, Result};
use crate::pipeline::{Handler, RequestContext, Response};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRideRequest {
    pub ride_id: RideId,
}

pub struct GetRide {
    pub(crate) inner: Arc<EngineInner>,
}

impl GetRide {
    fn may_view(snapshot: &RideSnapshot, subject_id: &str, role: Role) -> bool {
        match role {
            Role::Rider => snapshot.rider_id == subject_id,
            Role::Driver => snapshot
                .driver
                .as_ref()
                .is_some_and(|d| d.id.to_string() == subject_id),
        }
    }
}

#[async_trait]
impl Handler for GetRide {
    async fn call(&self, ctx: &RequestContext) -> Result<Response> {
        let subject = ctx.subject()?.clone();
        let request: GetRideRequest = ctx.parse_body()?;

        if let Some(snapshot) = self.inner.status_cache.get(request.ride_id) {
            if !Self::may_view(&snapshot, &subject.id, subject.role) {
                return Err(DispatchError::not_found("ride", request.ride_id));
            }
            return Response::json(200, &snapshot);
        }

        let ride = self
            .inner
            .store_call(self.inner.store.get_ride(request.ride_id))
            .await?
            .ok_or_else(|| DispatchError::not_found("ride", request.ride_id))?;

        let driver = match ride.assigned_driver_id {
            Some(driver_id) => self
                .inner
                .store_call(self.inner.store.get_driver(driver_id))
                .await?
                .map(|d| DriverBrief {
                    id: d.id,
                    name: d.name,
                    phone: d.phone,
                }),
            None => None,
        };

        let snapshot = RideSnapshot {
            id: ride.id,
            rider_id: ride.rider_id.clone(),
            status: ride.status,
            driver,
            estimated_fare: ride.estimated_fare,
            surge_multiplier: ride.surge_multiplier,
            cancel_reason: ride.cancel_reason.clone(),
            updated_at: ride.updated_at,
        };
        self.inner.status_cache.put(snapshot.clone());

        if !Self::may_view(&snapshot, &subject.id, subject.role) {
            return Err(DispatchError::not_found("ride", request.ride_id));
        }
        Response::json(200, &snapshot)
    }
}

//! High-frequency driver position updates. Lossy by contract: the geo upsert
//! is synchronous, the durable write rides the background flush.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::engine::EngineInner;
use crate::entities::{DriverId, GeoPoint};
use crate::error::{DispatchError, Result};
use crate::ops::{check_lat, check_lng};
use crate::pipeline::{Handler, RequestContext, Response};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationUpdateRequest {
    pub driver_id: DriverId,
    pub lat: f64,
    pub lng: f64,
}

impl LocationUpdateRequest {
    pub fn validate(&self) -> Result<()> {
        check_lat("lat", self.lat)?;
        check_lng("lng", self.lng)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationUpdateResponse {
    pub accepted: bool,
}

pub struct LocationUpdate {
    pub(crate) inner: Arc<EngineInner>,
}

#[async_trait]
impl Handler for LocationUpdate {
    async fn call(&self, ctx: &RequestContext) -> Result<Response> {
        let subject = ctx.require_role(Role::Driver)?;
        let request: LocationUpdateRequest = ctx.parse_body()?;
        request.validate()?;
        if subject.id != request.driver_id.to_string() {
            return Err(DispatchError::Unauthorized(
                "cannot report another driver's location".into(),
            ));
        }

        self.inner
            .ingest
            .submit(request.driver_id, GeoPoint::new(request.lat, request.lng))
            .await?;

        Response::json(202, &LocationUpdateResponse { accepted: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn bounds_checked() {
        let ok = LocationUpdateRequest {
            driver_id: Uuid::new_v4(),
            lat: 12.97,
            lng: 77.59,
        };
        assert!(ok.validate().is_ok());
        assert!(LocationUpdateRequest { lat: 95.0, ..ok }.validate().is_err());
    }
}

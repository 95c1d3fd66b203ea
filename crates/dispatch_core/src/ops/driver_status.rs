//! Driver availability toggles. `on_trip` is engine-owned and cannot be set
//! here; transitions keep the geo index and the ingest directory in step.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::engine::EngineInner;
use crate::entities::{DriverId, DriverStatus};
use crate::error::{DispatchError, Result};
use crate::pipeline::{Handler, RequestContext, Response};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetDriverStatusRequest {
    pub driver_id: DriverId,
    pub status: DriverStatus,
}

impl SetDriverStatusRequest {
    pub fn validate(&self) -> Result<()> {
        if self.status == DriverStatus::OnTrip {
            return Err(DispatchError::validation(
                "status",
                "on_trip is set by matching, not by this operation",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetDriverStatusResponse {
    pub driver_id: DriverId,
    pub status: DriverStatus,
}

pub struct SetDriverStatus {
    pub(crate) inner: Arc<EngineInner>,
}

#[async_trait]
impl Handler for SetDriverStatus {
    async fn call(&self, ctx: &RequestContext) -> Result<Response> {
        let subject = ctx.require_role(Role::Driver)?;
        let request: SetDriverStatusRequest = ctx.parse_body()?;
        request.validate()?;
        if subject.id != request.driver_id.to_string() {
            return Err(DispatchError::Unauthorized(
                "cannot change another driver's status".into(),
            ));
        }

        let driver = self
            .inner
            .store_call(
                self.inner
                    .store
                    .set_driver_status(request.driver_id, request.status),
            )
            .await?;

        match driver.status {
            DriverStatus::Available => {
                if let Some(position) = driver.last_position() {
                    self.inner.geo.upsert(driver.tier, driver.id, position)?;
                }
            }
            _ => self.inner.geo.remove(driver.tier, driver.id),
        }
        self.inner.ingest.invalidate_directory(driver.id);
        tracing::info!(driver_id = %driver.id, status = %driver.status, "driver status changed");

        Response::json(
            200,
            &SetDriverStatusResponse {
                driver_id: driver.id,
                status: driver.status,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn on_trip_is_rejected() {
        let request = SetDriverStatusRequest {
            driver_id: Uuid::new_v4(),
            status: DriverStatus::OnTrip,
        };
        assert!(request.validate().is_err());

        let request = SetDriverStatusRequest {
            driver_id: Uuid::new_v4(),
            status: DriverStatus::Available,
        };
        assert!(request.validate().is_ok());
    }
}

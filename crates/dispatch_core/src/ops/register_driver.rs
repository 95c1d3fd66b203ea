//! Driver onboarding. No auth; phone numbers are unique.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::EngineInner;
use crate::entities::{DriverId, DriverStatus, Tier};
use crate::error::{DispatchError, Result};
use crate::pipeline::{Handler, RequestContext, Response};
use crate::store::NewDriver;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDriverRequest {
    pub name: String,
    pub phone: String,
    pub tier: Tier,
}

impl RegisterDriverRequest {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DispatchError::validation("name", "must not be empty"));
        }
        let digits = self.phone.chars().filter(char::is_ascii_digit).count();
        if digits < 7 || self.phone.len() > 20 {
            return Err(DispatchError::validation(
                "phone",
                "expected 7-20 characters with at least 7 digits",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDriverResponse {
    pub driver_id: DriverId,
    pub status: DriverStatus,
}

pub struct RegisterDriver {
    pub(crate) inner: Arc<EngineInner>,
}

#[async_trait]
impl Handler for RegisterDriver {
    async fn call(&self, ctx: &RequestContext) -> Result<Response> {
        let request: RegisterDriverRequest = ctx.parse_body()?;
        request.validate()?;

        let driver = self
            .inner
            .store_call(self.inner.store.create_driver(NewDriver {
                name: request.name.trim().to_string(),
                phone: request.phone,
                tier: request.tier,
            }))
            .await?;
        tracing::info!(driver_id = %driver.id, tier = %driver.tier, "driver registered");

        Response::json(
            201,
            &RegisterDriverResponse {
                driver_id: driver.id,
                status: driver.status,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_bad_inputs() {
        let ok = RegisterDriverRequest {
            name: "Asha".into(),
            phone: "+91 9000000001".into(),
            tier: Tier::Standard,
        };
        assert!(ok.validate().is_ok());

        let blank = RegisterDriverRequest {
            name: "  ".into(),
            ..ok.clone()
        };
        assert!(blank.validate().is_err());

        let short = RegisterDriverRequest {
            phone: "12".into(),
            ..ok
        };
        assert!(short.validate().is_err());
    }
}

//! Payment capture: revalidate the fare server-side, charge the PSP under its
//! deadline, finalize the payment row.
//!
//! Outcomes: approved → `success`; declined → terminal `failed`; PSP
//! error/timeout → the payment stays `pending`, the error propagates as
//! retryable, and the idempotency stage abandons its placeholder so the same
//! client key may retry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::engine::EngineInner;
use crate::entities::{PaymentId, PaymentMethod, PaymentStatus, TripId, TripStatus};
use crate::error::{with_deadline, DispatchError, Result};
use crate::pipeline::{Handler, RequestContext, Response};
use crate::psp::CaptureOutcome;

/// Tolerance when comparing the client-submitted amount to the server fare.
const AMOUNT_EPSILON: f64 = 0.01;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturePaymentRequest {
    pub trip_id: TripId,
    pub amount: f64,
    pub payment_method: PaymentMethod,
}

impl CapturePaymentRequest {
    pub fn validate(&self) -> Result<()> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(DispatchError::validation(
                "amount",
                "amount must be positive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturePaymentResponse {
    pub payment_id: PaymentId,
    pub status: PaymentStatus,
    pub psp_ref: Option<String>,
    pub amount: f64,
}

pub struct CapturePayment {
    pub(crate) inner: Arc<EngineInner>,
}

#[async_trait]
impl Handler for CapturePayment {
    async fn call(&self, ctx: &RequestContext) -> Result<Response> {
        let subject = ctx.require_role(Role::Rider)?;
        let request: CapturePaymentRequest = ctx.parse_body()?;
        request.validate()?;

        let trip = self
            .inner
            .store_call(self.inner.store.get_trip(request.trip_id))
            .await?
            .ok_or_else(|| DispatchError::not_found("trip", request.trip_id))?;
        if trip.rider_id != subject.id {
            return Err(DispatchError::not_found("trip", request.trip_id));
        }
        if trip.status != TripStatus::Completed {
            return Err(DispatchError::conflict("trip is not yet completed"));
        }

        let payment = self
            .inner
            .store_call(self.inner.store.get_payment_by_trip(trip.id))
            .await?
            .ok_or_else(|| DispatchError::not_found("payment", trip.id))?;
        match payment.status {
            PaymentStatus::Success => {
                // Already captured; resource-level idempotent answer.
                return Response::json(
                    200,
                    &CapturePaymentResponse {
                        payment_id: payment.id,
                        status: payment.status,
                        psp_ref: payment.psp_ref,
                        amount: payment.amount,
                    },
                );
            }
            PaymentStatus::Failed => {
                return Err(DispatchError::conflict("payment already failed"));
            }
            PaymentStatus::Pending => {}
        }

        // Never trust the client amount: recompute from the trip's recorded
        // distance and the ride's frozen surge.
        let ride = self
            .inner
            .store_call(self.inner.store.get_ride(trip.ride_id))
            .await?
            .ok_or_else(|| DispatchError::not_found("ride", trip.ride_id))?;
        let distance_km = trip
            .distance_km
            .ok_or_else(|| DispatchError::conflict("trip has no recorded distance"))?;
        let server_fare = crate::pricing::calculate_fare(
            &self.inner.config.fares,
            ride.tier,
            distance_km,
            ride.surge_multiplier,
        );
        if (request.amount - server_fare).abs() > AMOUNT_EPSILON {
            return Err(DispatchError::conflict(format!(
                "amount mismatch: expected {server_fare:.2}"
            )));
        }

        let psp_key = ctx
            .client_key
            .clone()
            .unwrap_or_else(|| payment.id.to_string());
        let outcome = with_deadline(
            "psp",
            Duration::from_millis(self.inner.config.deadlines.psp_ms),
            self.inner
                .psp
                .capture(server_fare, request.payment_method, &psp_key),
        )
        .await?;

        let (status, psp_ref) = match outcome {
            CaptureOutcome::Approved { reference } => (PaymentStatus::Success, Some(reference)),
            CaptureOutcome::Declined => (PaymentStatus::Failed, None),
        };
        let finalized = self
            .inner
            .store_call(
                self.inner
                    .store
                    .finalize_payment(payment.id, status, psp_ref),
            )
            .await?;
        self.inner.status_cache.invalidate(ride.id);
        tracing::info!(
            payment_id = %finalized.id,
            trip_id = %trip.id,
            status = finalized.status.as_str(),
            "payment finalized"
        );

        Response::json(
            200,
            &CapturePaymentResponse {
                payment_id: finalized.id,
                status: finalized.status,
                psp_ref: finalized.psp_ref,
                amount: finalized.amount,
            },
        )
    }
}

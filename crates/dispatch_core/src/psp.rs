//! Payment processor seam.
//!
//! The PSP is an opaque collaborator: `capture` either approves with a
//! reference, declines, or fails with a transport error (`timeout` /
//! `unavailable`), in which case the payment stays pending and the caller may
//! retry.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::PaymentMethod;
use crate::error::{DispatchError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Approved { reference: String },
    Declined,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn capture(
        &self,
        amount: f64,
        method: PaymentMethod,
        idempotency_key: &str,
    ) -> Result<CaptureOutcome>;
}

// ============================================================================
// HTTP adapter
// ============================================================================

#[derive(Serialize)]
struct ChargeRequest<'a> {
    amount_minor: i64,
    currency: &'a str,
    source: &'a str,
}

#[derive(Deserialize)]
struct ChargeResponse {
    id: String,
    status: String,
}

/// Charges an HTTP PSP (`POST {base_url}/charges`) with the client idempotency
/// key forwarded in the `Idempotency-Key` header.
pub struct HttpProcessor {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpProcessor {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| DispatchError::Unavailable {
                dependency: "psp",
                details: err.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl PaymentProcessor for HttpProcessor {
    async fn capture(
        &self,
        amount: f64,
        method: PaymentMethod,
        idempotency_key: &str,
    ) -> Result<CaptureOutcome> {
        let request = ChargeRequest {
            amount_minor: (amount * 100.0).round() as i64,
            currency: "inr",
            source: method.as_str(),
        };
        let response = self
            .client
            .post(format!("{}/charges", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", idempotency_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    DispatchError::Timeout { dependency: "psp" }
                } else {
                    DispatchError::Unavailable {
                        dependency: "psp",
                        details: err.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status.as_u16() == 402 {
            return Ok(CaptureOutcome::Declined);
        }
        if !status.is_success() {
            return Err(DispatchError::Unavailable {
                dependency: "psp",
                details: format!("charge returned {status}"),
            });
        }

        let body: ChargeResponse =
            response
                .json()
                .await
                .map_err(|err| DispatchError::Unavailable {
                    dependency: "psp",
                    details: err.to_string(),
                })?;
        if body.status.eq_ignore_ascii_case("declined") {
            Ok(CaptureOutcome::Declined)
        } else {
            Ok(CaptureOutcome::Approved { reference: body.id })
        }
    }
}

// ============================================================================
// Stub adapter
// ============================================================================

/// In-process stand-in for a real PSP: approves by default, with scriptable
/// outcomes and a call log. Swap for [`HttpProcessor`] in production.
#[derive(Debug, Default)]
pub struct StubProcessor {
    calls: Mutex<Vec<CaptureCall>>,
    scripted: Mutex<VecDeque<Result<CaptureOutcome>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureCall {
    pub amount: f64,
    pub method: PaymentMethod,
    pub idempotency_key: String,
}

impl StubProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome for the next capture call (FIFO).
    pub fn script(&self, outcome: Result<CaptureOutcome>) {
        self.scripted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
    }

    pub fn calls(&self) -> Vec<CaptureCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl PaymentProcessor for StubProcessor {
    async fn capture(
        &self,
        amount: f64,
        method: PaymentMethod,
        idempotency_key: &str,
    ) -> Result<CaptureOutcome> {
        if amount <= 0.0 {
            return Err(DispatchError::validation(
                "amount",
                "amount must be positive",
            ));
        }
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CaptureCall {
                amount,
                method,
                idempotency_key: idempotency_key.to_string(),
            });
        let scripted = self
            .scripted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match scripted {
            Some(outcome) => outcome,
            None => Ok(CaptureOutcome::Approved {
                reference: format!("PSP-{}", &Uuid::new_v4().simple().to_string()[..12].to_uppercase()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_approves_by_default_and_records_calls() {
        let psp = StubProcessor::new();
        let outcome = psp.capture(480.0, PaymentMethod::Card, "K1").await.unwrap();
        assert!(matches!(outcome, CaptureOutcome::Approved { .. }));
        assert_eq!(psp.call_count(), 1);
        assert_eq!(psp.calls()[0].idempotency_key, "K1");
    }

    #[tokio::test]
    async fn stub_plays_scripted_outcomes_in_order() {
        let psp = StubProcessor::new();
        psp.script(Ok(CaptureOutcome::Declined));
        psp.script(Err(DispatchError::Timeout { dependency: "psp" }));

        assert_eq!(
            psp.capture(10.0, PaymentMethod::Card, "K").await.unwrap(),
            CaptureOutcome::Declined
        );
        assert!(psp.capture(10.0, PaymentMethod::Card, "K").await.is_err());
        assert!(matches!(
            psp.capture(10.0, PaymentMethod::Card, "K").await.unwrap(),
            CaptureOutcome::Approved { .. }
        ));
    }
}

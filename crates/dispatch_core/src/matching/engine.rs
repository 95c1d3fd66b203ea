//! The per-ride matching loop: expanding radius sweeps over geo-index
//! candidates, allocation-locked atomic assignment, terminal cancellation on
//! budget exhaustion.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::cache::RideStatusCache;
use crate::config::{DeadlineConfig, MatchingConfig};
use crate::entities::{DriverId, TripId};
use crate::error::{with_deadline, Result};
use crate::spatial::DriverGeoIndex;
use crate::store::{AssignOutcome, StateStore};

use super::{AllocationLocks, MatchRequest};

/// Reason recorded on rides cancelled by matching exhaustion.
pub const NO_DRIVER_FOUND: &str = "no_driver_found";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched { driver_id: DriverId, trip_id: TripId },
    /// Budget exhausted; the ride was cancelled with [`NO_DRIVER_FOUND`].
    NoDriverFound,
    /// The ride left `REQUESTED` while we were matching (cancelled elsewhere).
    RideGone,
}

enum Sweep {
    Matched { driver_id: DriverId, trip_id: TripId },
    RideGone,
    NoneYet,
}

pub struct MatchingEngine {
    store: Arc<dyn StateStore>,
    geo: Arc<DriverGeoIndex>,
    locks: Arc<AllocationLocks>,
    status_cache: Arc<RideStatusCache>,
    config: MatchingConfig,
    deadlines: DeadlineConfig,
}

impl MatchingEngine {
    pub fn new(
        store: Arc<dyn StateStore>,
        geo: Arc<DriverGeoIndex>,
        locks: Arc<AllocationLocks>,
        status_cache: Arc<RideStatusCache>,
        config: MatchingConfig,
        deadlines: DeadlineConfig,
    ) -> Self {
        Self {
            store,
            geo,
            locks,
            status_cache,
            config,
            deadlines,
        }
    }

    /// Run matching for one ride to a terminal outcome.
    pub async fn match_ride(&self, request: &MatchRequest) -> Result<MatchOutcome> {
        let deadline = Instant::now() + Duration::from_millis(self.config.budget_ms);
        let mut radius_km = self.config.initial_radius_km;

        loop {
            match self.sweep(request, radius_km).await? {
                Sweep::Matched { driver_id, trip_id } => {
                    tracing::info!(
                        ride_id = %request.ride_id,
                        driver_id = %driver_id,
                        radius_km,
                        "ride matched"
                    );
                    return Ok(MatchOutcome::Matched { driver_id, trip_id });
                }
                Sweep::RideGone => {
                    tracing::info!(ride_id = %request.ride_id, "ride left REQUESTED, aborting match");
                    return Ok(MatchOutcome::RideGone);
                }
                Sweep::NoneYet => {}
            }

            let delay = self.retry_delay();
            if Instant::now() + delay >= deadline {
                break;
            }
            tokio::time::sleep(delay).await;
            radius_km = (radius_km * self.config.backoff).min(self.config.max_radius_km);
        }

        self.give_up(request).await
    }

    /// One pass over the candidates inside `radius_km`, nearest first.
    async fn sweep(&self, request: &MatchRequest, radius_km: f64) -> Result<Sweep> {
        let candidates = self.geo.search_by_radius(
            request.tier,
            request.pickup,
            radius_km,
            self.config.candidate_limit,
        )?;

        for (driver_id, distance_km) in candidates {
            if !self.locks.acquire(driver_id, request.ride_id) {
                continue;
            }

            let assigned = with_deadline(
                "state store",
                Duration::from_millis(self.deadlines.store_ms),
                self.store.assign_ride_atomic(request.ride_id, driver_id),
            )
            .await;

            match assigned {
                Ok(AssignOutcome::Assigned { trip_id }) => {
                    // Claim stays held until driver-accept or TTL expiry.
                    self.geo.remove(request.tier, driver_id);
                    self.status_cache.invalidate(request.ride_id);
                    tracing::debug!(
                        ride_id = %request.ride_id,
                        driver_id = %driver_id,
                        distance_km,
                        "assignment committed"
                    );
                    return Ok(Sweep::Matched { driver_id, trip_id });
                }
                Ok(AssignOutcome::DriverConflict) => {
                    self.locks.release(driver_id, request.ride_id);
                }
                Ok(AssignOutcome::RideConflict) => {
                    self.locks.release(driver_id, request.ride_id);
                    return Ok(Sweep::RideGone);
                }
                Err(err) if err.is_retryable() => {
                    self.locks.release(driver_id, request.ride_id);
                    tracing::warn!(
                        ride_id = %request.ride_id,
                        driver_id = %driver_id,
                        error = %err,
                        "assignment attempt failed, trying next candidate"
                    );
                }
                Err(err) => {
                    self.locks.release(driver_id, request.ride_id);
                    return Err(err);
                }
            }
        }

        Ok(Sweep::NoneYet)
    }

    async fn give_up(&self, request: &MatchRequest) -> Result<MatchOutcome> {
        let cancelled = with_deadline(
            "state store",
            Duration::from_millis(self.deadlines.store_ms),
            self.store.cancel_ride(request.ride_id, NO_DRIVER_FOUND),
        )
        .await;
        match cancelled {
            Ok(_) => {
                tracing::warn!(ride_id = %request.ride_id, "no driver found, ride cancelled");
            }
            Err(err) => {
                // Most likely the ride reached a terminal state on another path.
                tracing::warn!(ride_id = %request.ride_id, error = %err, "cancel after exhaustion failed");
            }
        }
        self.status_cache.invalidate(request.ride_id);
        Ok(MatchOutcome::NoDriverFound)
    }

    fn retry_delay(&self) -> Duration {
        let base = self.config.retry_delay_ms;
        let jitter = rand::thread_rng().gen_range(0..=base / 4 + 1);
        Duration::from_millis(base + jitter)
    }
}

//! Per-driver allocation locks.
//!
//! A matching attempt claims a driver here before opening the heavier store
//! transaction; the row lock stays the authoritative arbiter. Claims carry a
//! TTL so a crashed worker cannot block reassignment, and are released by the
//! holder on driver-accept or on a failed assignment.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::entities::{DriverId, RideId};

#[derive(Debug, Clone, Copy)]
struct Claim {
    holder: RideId,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct AllocationLocks {
    ttl: Duration,
    claims: Mutex<HashMap<DriverId, Claim>>,
}

impl AllocationLocks {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            claims: Mutex::new(HashMap::new()),
        }
    }

    /// Compare-and-set claim. Returns false while another ride holds a live
    /// claim; re-acquiring by the same holder refreshes the TTL.
    pub fn acquire(&self, driver: DriverId, holder: RideId) -> bool {
        let now = Instant::now();
        let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        match claims.get(&driver) {
            Some(claim) if claim.expires_at > now && claim.holder != holder => false,
            _ => {
                claims.insert(
                    driver,
                    Claim {
                        holder,
                        expires_at: now + self.ttl,
                    },
                );
                true
            }
        }
    }

    /// Unconditional release by the holder; a non-holder release is a no-op.
    pub fn release(&self, driver: DriverId, holder: RideId) {
        let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        if claims.get(&driver).is_some_and(|c| c.holder == holder) {
            claims.remove(&driver);
        }
    }

    pub fn is_held(&self, driver: DriverId) -> bool {
        let now = Instant::now();
        let claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        claims.get(&driver).is_some_and(|c| c.expires_at > now)
    }

    /// Drop expired claims. Called opportunistically by the sweep worker.
    pub fn prune_expired(&self) {
        let now = Instant::now();
        let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        claims.retain(|_, claim| claim.expires_at > now);
    }
}

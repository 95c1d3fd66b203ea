//! Driver–rider matching.
//!
//! Flow per ride:
//!   1. Radius search on the geo index for the ride's tier (nearest first).
//!   2. Claim the top candidate with a TTL allocation lock.
//!   3. Commit ride + driver + trip atomically through the state store.
//!   4. On driver conflict, release and try the next candidate; grow the
//!      radius between sweeps; give up when the budget expires.

pub mod allocation;
pub mod engine;

pub use allocation::AllocationLocks;
pub use engine::{MatchOutcome, MatchingEngine, NO_DRIVER_FOUND};

use crate::entities::{GeoPoint, RideId, Tier};

/// Work item handed to the matching worker after `create_ride` commits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchRequest {
    pub ride_id: RideId,
    pub pickup: GeoPoint,
    pub tier: Tier,
}

//! Ride-status read cache: cache-aside over `get_ride` with explicit
//! invalidation after every state transition. A stale read just before an
//! invalidation is acceptable and bounded by the TTL.

use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use lru::LruCache;
use tokio::time::Instant;

use crate::config::StatusCacheConfig;
use crate::entities::{RideId, RideSnapshot};

#[derive(Debug, Clone)]
struct CachedEntry {
    snapshot: RideSnapshot,
    stored_at: Instant,
}

#[derive(Debug)]
pub struct RideStatusCache {
    ttl: Duration,
    entries: Mutex<LruCache<RideId, CachedEntry>>,
}

impl RideStatusCache {
    pub fn new(config: &StatusCacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity.max(1)).expect("capacity is at least 1");
        Self {
            ttl: Duration::from_secs(config.ttl_seconds),
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, ride_id: RideId) -> Option<RideSnapshot> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(&ride_id) {
            Some(entry) if entry.stored_at.elapsed() <= self.ttl => Some(entry.snapshot.clone()),
            Some(_) => {
                entries.pop(&ride_id);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, snapshot: RideSnapshot) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.put(
            snapshot.id,
            CachedEntry {
                snapshot,
                stored_at: Instant::now(),
            },
        );
    }

    /// Called after each transition commits.
    pub fn invalidate(&self, ride_id: RideId) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.pop(&ride_id);
    }

    pub fn contains(&self, ride_id: RideId) -> bool {
        self.get(ride_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::RideStatus;
    use chrono::Utc;
    use uuid::Uuid;

    fn snapshot(id: RideId, status: RideStatus) -> RideSnapshot {
        RideSnapshot {
            id,
            rider_id: "rider-1".into(),
            status,
            driver: None,
            estimated_fare: 120.0,
            surge_multiplier: 1.0,
            cancel_reason: None,
            updated_at: Utc::now(),
        }
    }

    fn cache() -> RideStatusCache {
        RideStatusCache::new(&StatusCacheConfig::default())
    }

    #[tokio::test]
    async fn put_get_and_invalidate() {
        let cache = cache();
        let id = Uuid::new_v4();
        cache.put(snapshot(id, RideStatus::Requested));
        assert_eq!(cache.get(id).map(|s| s.status), Some(RideStatus::Requested));

        cache.invalidate(id);
        assert!(cache.get(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = cache();
        let id = Uuid::new_v4();
        cache.put(snapshot(id, RideStatus::Matched));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.get(id).is_none());
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let cache = RideStatusCache::new(&StatusCacheConfig {
            ttl_seconds: 30,
            capacity: 2,
        });
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        cache.put(snapshot(a, RideStatus::Requested));
        cache.put(snapshot(b, RideStatus::Requested));
        cache.put(snapshot(c, RideStatus::Requested));
        assert!(cache.get(a).is_none());
        assert!(cache.get(b).is_some());
        assert!(cache.get(c).is_some());
    }
}

//! Fare calculation and surge pricing.
//!
//! `fare = round2(base_fare[tier] + distance_km × per_km_rate[tier] × surge)`.
//! The surge multiplier comes from rolling per-cell demand/supply counters and
//! is captured once at ride creation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use h3o::{CellIndex, Resolution};
use tokio::time::Instant;

use crate::config::{FareSchedule, SurgeConfig};
use crate::entities::{DriverId, GeoPoint, Tier};
use crate::error::Result;
use crate::spatial::cell_at;

/// Round to 2 decimal places (currency).
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Round to 3 decimal places (recorded trip distance).
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Fare for a trip of `distance_km` at the multiplier frozen on the ride.
pub fn calculate_fare(schedule: &FareSchedule, tier: Tier, distance_km: f64, surge: f64) -> f64 {
    round2(schedule.base_fare.get(tier) + distance_km * schedule.per_km_rate.get(tier) * surge)
}

#[derive(Debug, Default)]
struct CellActivity {
    demand: VecDeque<Instant>,
    supply: HashMap<DriverId, Instant>,
}

impl CellActivity {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.demand.front() {
            if now.duration_since(*front) > window {
                self.demand.pop_front();
            } else {
                break;
            }
        }
        self.supply
            .retain(|_, seen| now.duration_since(*seen) <= window);
    }

    fn is_idle(&self) -> bool {
        self.demand.is_empty() && self.supply.is_empty()
    }
}

/// Rolling demand/supply counters per H3 cell.
///
/// Demand counts ride requests in the window; supply counts distinct available
/// drivers observed by periodic geo-index sweeps. The multiplier is computed
/// on demand, never materialized.
#[derive(Debug)]
pub struct SurgeTracker {
    resolution: Resolution,
    window: Duration,
    max_multiplier: f64,
    cells: Mutex<HashMap<CellIndex, CellActivity>>,
}

impl SurgeTracker {
    pub fn new(config: &SurgeConfig) -> Self {
        Self {
            resolution: config.cell_resolution,
            window: Duration::from_secs(config.window_seconds),
            max_multiplier: config.max_multiplier,
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Record one ride request at `point`.
    pub fn record_demand(&self, point: GeoPoint) -> Result<()> {
        let cell = cell_at(point, self.resolution)?;
        let now = Instant::now();
        let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        let activity = cells.entry(cell).or_default();
        activity.prune(now, self.window);
        activity.demand.push_back(now);
        Ok(())
    }

    /// Record an available driver seen at `point` by a supply sweep.
    pub fn observe_supply(&self, driver: DriverId, point: GeoPoint) -> Result<()> {
        let cell = cell_at(point, self.resolution)?;
        let now = Instant::now();
        let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        let activity = cells.entry(cell).or_default();
        activity.prune(now, self.window);
        activity.supply.insert(driver, now);
        Ok(())
    }

    /// Current multiplier for the cell containing `point`, clamped to
    /// `[1.0, max]`.
    pub fn multiplier_at(&self, point: GeoPoint) -> Result<f64> {
        let cell = cell_at(point, self.resolution)?;
        let now = Instant::now();
        let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(activity) = cells.get_mut(&cell) else {
            return Ok(1.0);
        };
        activity.prune(now, self.window);

        let demand = activity.demand.len() as f64;
        let supply = activity.supply.len().max(1) as f64;
        if activity.is_idle() {
            cells.remove(&cell);
            return Ok(1.0);
        }

        let ratio = demand / supply;
        let raw = 1.0 + 0.5 * (ratio - 1.0).max(0.0);
        Ok(round2(raw.clamp(1.0, self.max_multiplier)))
    }

    /// Drop cells whose windows emptied out. Called by the sweep worker.
    pub fn prune_idle(&self) {
        let now = Instant::now();
        let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        cells.retain(|_, activity| {
            activity.prune(now, self.window);
            !activity.is_idle()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const BLR: GeoPoint = GeoPoint {
        lat: 12.9716,
        lng: 77.5946,
    };

    fn tracker() -> SurgeTracker {
        SurgeTracker::new(&SurgeConfig::default())
    }

    #[test]
    fn fare_follows_formula() {
        let schedule = FareSchedule::default();
        let fare = calculate_fare(&schedule, Tier::Standard, 10.0, 1.0);
        assert_eq!(fare, 170.0);
        let surged = calculate_fare(&schedule, Tier::Premium, 4.2, 2.0);
        assert_eq!(surged, round2(100.0 + 4.2 * 25.0 * 2.0));
    }

    #[tokio::test]
    async fn idle_cell_multiplier_is_one() {
        assert_eq!(tracker().multiplier_at(BLR).unwrap(), 1.0);
    }

    #[tokio::test]
    async fn demand_over_supply_raises_multiplier() {
        let tracker = tracker();
        for _ in 0..10 {
            tracker.record_demand(BLR).unwrap();
        }
        tracker.observe_supply(Uuid::new_v4(), BLR).unwrap();
        tracker.observe_supply(Uuid::new_v4(), BLR).unwrap();
        // ratio = 10 / 2 = 5 → 1 + 0.5 × 4 = 3.0
        assert_eq!(tracker.multiplier_at(BLR).unwrap(), 3.0);
    }

    #[tokio::test]
    async fn multiplier_clamps_at_max() {
        let tracker = tracker();
        for _ in 0..100 {
            tracker.record_demand(BLR).unwrap();
        }
        assert_eq!(tracker.multiplier_at(BLR).unwrap(), 5.0);
    }

    #[tokio::test]
    async fn balanced_cell_stays_at_one() {
        let tracker = tracker();
        tracker.record_demand(BLR).unwrap();
        tracker.observe_supply(Uuid::new_v4(), BLR).unwrap();
        tracker.observe_supply(Uuid::new_v4(), BLR).unwrap();
        assert_eq!(tracker.multiplier_at(BLR).unwrap(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn counters_expire_after_window() {
        let tracker = tracker();
        for _ in 0..10 {
            tracker.record_demand(BLR).unwrap();
        }
        assert_eq!(tracker.multiplier_at(BLR).unwrap(), 5.0);

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(tracker.multiplier_at(BLR).unwrap(), 1.0);
    }

    #[tokio::test]
    async fn supply_counts_distinct_drivers() {
        let tracker = tracker();
        let driver = Uuid::new_v4();
        for _ in 0..5 {
            tracker.observe_supply(driver, BLR).unwrap();
        }
        for _ in 0..4 {
            tracker.record_demand(BLR).unwrap();
        }
        // supply is 1 distinct driver, ratio 4 → 1 + 0.5 × 3 = 2.5
        assert_eq!(tracker.multiplier_at(BLR).unwrap(), 2.5);
    }
}

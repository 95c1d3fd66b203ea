//! Spatial operations: haversine distances, H3 cell helpers, and the per-tier
//! in-memory driver index.
//!
//! The index buckets drivers by H3 cell and answers radius queries by walking
//! a grid disk of candidate cells, then filtering on exact distance. Membership
//! means "currently broadcasting location for this tier"; the state store stays
//! authoritative for assignment eligibility.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use h3o::{CellIndex, LatLng, Resolution};

use crate::entities::{DriverId, GeoPoint, Tier};
use crate::error::{DispatchError, Result};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two coordinates.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lng.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lng.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Resolve a coordinate to its H3 cell at the given resolution.
pub fn cell_at(point: GeoPoint, resolution: Resolution) -> Result<CellIndex> {
    let latlng = LatLng::new(point.lat, point.lng).map_err(|_| {
        DispatchError::validation(
            "coordinates",
            format!("({}, {}) is not a valid WGS84 position", point.lat, point.lng),
        )
    })?;
    Ok(latlng.to_cell(resolution))
}

fn cell_center(cell: CellIndex) -> GeoPoint {
    let latlng: LatLng = cell.into();
    GeoPoint::new(latlng.lat(), latlng.lng())
}

/// Smallest center-to-center spacing around `origin`, used to size grid disks.
fn local_cell_spacing_km(origin: CellIndex) -> f64 {
    let center = cell_center(origin);
    let spacing = origin
        .grid_disk::<Vec<_>>(1)
        .into_iter()
        .filter(|cell| *cell != origin)
        .map(|cell| haversine_km(center, cell_center(cell)))
        .fold(f64::INFINITY, f64::min);
    if spacing.is_finite() && spacing > 0.0 {
        spacing
    } else {
        1.0
    }
}

/// Cells whose drivers could lie within `radius_km` of `origin`.
fn covering_disk(origin: CellIndex, radius_km: f64) -> Vec<CellIndex> {
    let k = (radius_km / local_cell_spacing_km(origin)).ceil() as u32 + 1;
    origin.grid_disk::<Vec<_>>(k)
}

#[derive(Debug, Default)]
struct TierCells {
    drivers_by_cell: HashMap<CellIndex, Vec<DriverId>>,
    driver_to_cell: HashMap<DriverId, CellIndex>,
    positions: HashMap<DriverId, GeoPoint>,
}

impl TierCells {
    fn upsert(&mut self, driver: DriverId, cell: CellIndex, point: GeoPoint) {
        if let Some(old_cell) = self.driver_to_cell.get(&driver).copied() {
            if old_cell != cell {
                self.detach(driver, old_cell);
                self.drivers_by_cell.entry(cell).or_default().push(driver);
                self.driver_to_cell.insert(driver, cell);
            }
        } else {
            self.drivers_by_cell.entry(cell).or_default().push(driver);
            self.driver_to_cell.insert(driver, cell);
        }
        self.positions.insert(driver, point);
    }

    fn remove(&mut self, driver: DriverId) {
        if let Some(cell) = self.driver_to_cell.remove(&driver) {
            self.detach_from_bucket(driver, cell);
        }
        self.positions.remove(&driver);
    }

    fn detach(&mut self, driver: DriverId, cell: CellIndex) {
        self.driver_to_cell.remove(&driver);
        self.detach_from_bucket(driver, cell);
    }

    fn detach_from_bucket(&mut self, driver: DriverId, cell: CellIndex) {
        if let Some(bucket) = self.drivers_by_cell.get_mut(&cell) {
            bucket.retain(|id| *id != driver);
            if bucket.is_empty() {
                self.drivers_by_cell.remove(&cell);
            }
        }
    }
}

/// Per-tier spatial index of drivers currently broadcasting location.
#[derive(Debug)]
pub struct DriverGeoIndex {
    resolution: Resolution,
    tiers: RwLock<HashMap<Tier, TierCells>>,
}

impl DriverGeoIndex {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            tiers: RwLock::new(HashMap::new()),
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Insert or move a driver. Sub-millisecond; called on the location hot path.
    pub fn upsert(&self, tier: Tier, driver: DriverId, point: GeoPoint) -> Result<()> {
        let cell = cell_at(point, self.resolution)?;
        let mut tiers = self.tiers.write().unwrap_or_else(PoisonError::into_inner);
        tiers.entry(tier).or_default().upsert(driver, cell, point);
        Ok(())
    }

    pub fn remove(&self, tier: Tier, driver: DriverId) {
        let mut tiers = self.tiers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(cells) = tiers.get_mut(&tier) {
            cells.remove(driver);
        }
    }

    pub fn contains(&self, tier: Tier, driver: DriverId) -> bool {
        let tiers = self.tiers.read().unwrap_or_else(PoisonError::into_inner);
        tiers
            .get(&tier)
            .is_some_and(|cells| cells.driver_to_cell.contains_key(&driver))
    }

    pub fn position(&self, tier: Tier, driver: DriverId) -> Option<GeoPoint> {
        let tiers = self.tiers.read().unwrap_or_else(PoisonError::into_inner);
        tiers.get(&tier).and_then(|cells| cells.positions.get(&driver).copied())
    }

    /// Drivers within `radius_km` of `origin`, nearest first, at most `limit`.
    pub fn search_by_radius(
        &self,
        tier: Tier,
        origin: GeoPoint,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<(DriverId, f64)>> {
        let origin_cell = cell_at(origin, self.resolution)?;
        let tiers = self.tiers.read().unwrap_or_else(PoisonError::into_inner);
        let Some(cells) = tiers.get(&tier) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<(DriverId, f64)> = Vec::new();
        for cell in covering_disk(origin_cell, radius_km) {
            let Some(bucket) = cells.drivers_by_cell.get(&cell) else {
                continue;
            };
            for driver in bucket {
                let Some(position) = cells.positions.get(driver) else {
                    continue;
                };
                let distance = haversine_km(origin, *position);
                if distance <= radius_km {
                    hits.push((*driver, distance));
                }
            }
        }

        hits.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// All indexed drivers of a tier with their positions (supply sweeps).
    pub fn snapshot(&self, tier: Tier) -> Vec<(DriverId, GeoPoint)> {
        let tiers = self.tiers.read().unwrap_or_else(PoisonError::into_inner);
        tiers
            .get(&tier)
            .map(|cells| cells.positions.iter().map(|(id, p)| (*id, *p)).collect())
            .unwrap_or_default()
    }

    pub fn len(&self, tier: Tier) -> usize {
        let tiers = self.tiers.read().unwrap_or_else(PoisonError::into_inner);
        tiers.get(&tier).map(|cells| cells.driver_to_cell.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, tier: Tier) -> bool {
        self.len(tier) == 0
    }
}

impl Default for DriverGeoIndex {
    fn default() -> Self {
        Self::new(Resolution::Eight)
    }
}

//! Engine configuration: tier rates, matching ladder, surge windows, ingest
//! tuning. Every component receives its slice of [`DispatchConfig`] at wiring
//! time; nothing reads the environment after startup.

use std::env;

use h3o::Resolution;

use crate::entities::Tier;

/// Per-tier currency amounts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierRates {
    pub standard: f64,
    pub premium: f64,
    pub xl: f64,
}

impl TierRates {
    pub fn get(&self, tier: Tier) -> f64 {
        match tier {
            Tier::Standard => self.standard,
            Tier::Premium => self.premium,
            Tier::Xl => self.xl,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FareSchedule {
    pub base_fare: TierRates,
    pub per_km_rate: TierRates,
}

impl Default for FareSchedule {
    fn default() -> Self {
        Self {
            base_fare: TierRates {
                standard: 50.0,
                premium: 100.0,
                xl: 80.0,
            },
            per_km_rate: TierRates {
                standard: 12.0,
                premium: 25.0,
                xl: 18.0,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchingConfig {
    pub initial_radius_km: f64,
    pub max_radius_km: f64,
    /// Multiplicative radius backoff per sweep.
    pub backoff: f64,
    pub retry_delay_ms: u64,
    /// Overall budget for one ride's matching attempts.
    pub budget_ms: u64,
    pub candidate_limit: usize,
    /// TTL on the per-driver allocation lock.
    pub lock_ttl_ms: u64,
    /// Depth of the bounded queue feeding the matching worker.
    pub queue_depth: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            initial_radius_km: 2.0,
            max_radius_km: 10.0,
            backoff: 1.5,
            retry_delay_ms: 200,
            budget_ms: 30_000,
            candidate_limit: 20,
            lock_ttl_ms: 10_000,
            queue_depth: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurgeConfig {
    /// H3 resolution of demand/supply cells (Six ≈ 5 km across).
    pub cell_resolution: Resolution,
    pub window_seconds: u64,
    pub max_multiplier: f64,
    /// Interval of the geo-index supply sweep.
    pub sweep_interval_ms: u64,
}

impl Default for SurgeConfig {
    fn default() -> Self {
        Self {
            cell_resolution: Resolution::Six,
            window_seconds: 300,
            max_multiplier: 5.0,
            sweep_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdempotencyConfig {
    pub ttl_seconds: u64,
    /// Bounded wait for a concurrent in-flight request with the same key.
    pub inflight_wait_ms: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 86_400,
            inflight_wait_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationConfig {
    pub flush_interval_ms: u64,
    pub flush_batch: usize,
    pub buffer_capacity: usize,
    /// TTL of the driver tier/status directory cache on the ingest path.
    pub directory_ttl_seconds: u64,
    pub directory_capacity: usize,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 500,
            flush_batch: 1000,
            buffer_capacity: 10_000,
            directory_ttl_seconds: 300,
            directory_capacity: 65_536,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusCacheConfig {
    pub ttl_seconds: u64,
    pub capacity: usize,
}

impl Default for StatusCacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 30,
            capacity: 10_000,
        }
    }
}

/// Deadlines applied to every external call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeadlineConfig {
    pub store_ms: u64,
    pub psp_ms: u64,
    pub geo_ms: u64,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            store_ms: 2_000,
            psp_ms: 10_000,
            geo_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoConfig {
    /// H3 resolution of the driver index buckets (Eight ≈ 0.9 km across).
    pub index_resolution: Resolution,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            index_resolution: Resolution::Eight,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchConfig {
    pub fares: FareSchedule,
    pub matching: MatchingConfig,
    pub surge: SurgeConfig,
    pub idempotency: IdempotencyConfig,
    pub location: LocationConfig,
    pub status_cache: StatusCacheConfig,
    pub deadlines: DeadlineConfig,
    pub geo: GeoConfig,
}

impl DispatchConfig {
    pub fn with_fares(mut self, fares: FareSchedule) -> Self {
        self.fares = fares;
        self
    }

    pub fn with_matching(mut self, matching: MatchingConfig) -> Self {
        self.matching = matching;
        self
    }

    pub fn with_surge(mut self, surge: SurgeConfig) -> Self {
        self.surge = surge;
        self
    }

    pub fn with_location(mut self, location: LocationConfig) -> Self {
        self.location = location;
        self
    }

    pub fn with_status_cache_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.status_cache.ttl_seconds = ttl_seconds;
        self
    }

    pub fn with_deadlines(mut self, deadlines: DeadlineConfig) -> Self {
        self.deadlines = deadlines;
        self
    }

    /// Apply `DISPATCH_*` environment overrides on top of the compiled
    /// defaults. Unset or unparsable variables keep the current value.
    ///
    /// Recognized keys: `DISPATCH_MATCH_INITIAL_RADIUS_KM`,
    /// `DISPATCH_MATCH_MAX_RADIUS_KM`, `DISPATCH_MATCH_BUDGET_MS`,
    /// `DISPATCH_MATCH_RETRY_DELAY_MS`, `DISPATCH_SURGE_WINDOW_SECONDS`,
    /// `DISPATCH_SURGE_CELL_RESOLUTION`, `DISPATCH_SURGE_MAX`,
    /// `DISPATCH_IDEMPOTENCY_TTL_SECONDS`, `DISPATCH_LOCATION_FLUSH_INTERVAL_MS`,
    /// `DISPATCH_LOCATION_BUFFER_CAPACITY`, `DISPATCH_STATUS_CACHE_TTL_SECONDS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = read_env::<f64>("DISPATCH_MATCH_INITIAL_RADIUS_KM") {
            config.matching.initial_radius_km = v;
        }
        if let Some(v) = read_env::<f64>("DISPATCH_MATCH_MAX_RADIUS_KM") {
            config.matching.max_radius_km = v;
        }
        if let Some(v) = read_env::<u64>("DISPATCH_MATCH_BUDGET_MS") {
            config.matching.budget_ms = v;
        }
        if let Some(v) = read_env::<u64>("DISPATCH_MATCH_RETRY_DELAY_MS") {
            config.matching.retry_delay_ms = v;
        }
        if let Some(v) = read_env::<u64>("DISPATCH_SURGE_WINDOW_SECONDS") {
            config.surge.window_seconds = v;
        }
        if let Some(v) = read_env::<u8>("DISPATCH_SURGE_CELL_RESOLUTION") {
            if let Ok(resolution) = Resolution::try_from(v) {
                config.surge.cell_resolution = resolution;
            }
        }
        if let Some(v) = read_env::<f64>("DISPATCH_SURGE_MAX") {
            config.surge.max_multiplier = v;
        }
        if let Some(v) = read_env::<u64>("DISPATCH_IDEMPOTENCY_TTL_SECONDS") {
            config.idempotency.ttl_seconds = v;
        }
        if let Some(v) = read_env::<u64>("DISPATCH_LOCATION_FLUSH_INTERVAL_MS") {
            config.location.flush_interval_ms = v;
        }
        if let Some(v) = read_env::<usize>("DISPATCH_LOCATION_BUFFER_CAPACITY") {
            config.location.buffer_capacity = v;
        }
        if let Some(v) = read_env::<u64>("DISPATCH_STATUS_CACHE_TTL_SECONDS") {
            config.status_cache.ttl_seconds = v;
        }

        config
    }
}

fn read_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_keys() {
        let config = DispatchConfig::default();
        assert_eq!(config.fares.base_fare.get(Tier::Standard), 50.0);
        assert_eq!(config.fares.per_km_rate.get(Tier::Premium), 25.0);
        assert_eq!(config.matching.initial_radius_km, 2.0);
        assert_eq!(config.matching.max_radius_km, 10.0);
        assert_eq!(config.matching.backoff, 1.5);
        assert_eq!(config.matching.retry_delay_ms, 200);
        assert_eq!(config.matching.budget_ms, 30_000);
        assert_eq!(config.surge.window_seconds, 300);
        assert_eq!(config.surge.max_multiplier, 5.0);
        assert_eq!(config.idempotency.ttl_seconds, 86_400);
        assert_eq!(config.idempotency.inflight_wait_ms, 10_000);
        assert_eq!(config.location.flush_interval_ms, 500);
        assert_eq!(config.location.flush_batch, 1000);
        assert_eq!(config.location.buffer_capacity, 10_000);
        assert_eq!(config.status_cache.ttl_seconds, 30);
    }

    #[test]
    fn builders_override_single_sections() {
        let config = DispatchConfig::default()
            .with_status_cache_ttl_seconds(5)
            .with_matching(MatchingConfig {
                budget_ms: 1_000,
                ..Default::default()
            });
        assert_eq!(config.status_cache.ttl_seconds, 5);
        assert_eq!(config.matching.budget_ms, 1_000);
        assert_eq!(config.matching.max_radius_km, 10.0);
    }
}

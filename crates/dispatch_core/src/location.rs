//! Location ingest: the hot path writes the geo index synchronously and
//! enqueues the sample into a bounded ring; a background worker flushes the
//! latest sample per driver to the state store in batches.
//!
//! The buffer drops oldest entries when full. The geo index stays
//! authoritative for matching; the durable row is a historical convenience.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use lru::LruCache;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

use crate::config::{DeadlineConfig, LocationConfig};
use crate::entities::{DriverId, DriverStatus, GeoPoint, Tier};
use crate::error::{with_deadline, DispatchError, Result};
use crate::spatial::DriverGeoIndex;
use crate::store::{LocationSample, StateStore};

#[derive(Debug, Clone, Copy)]
struct DirectoryEntry {
    tier: Tier,
    status: DriverStatus,
    cached_at: Instant,
}

pub struct LocationIngest {
    config: LocationConfig,
    deadlines: DeadlineConfig,
    geo: Arc<DriverGeoIndex>,
    store: Arc<dyn StateStore>,
    buffer: Mutex<VecDeque<LocationSample>>,
    batch_ready: Notify,
    directory: Mutex<LruCache<DriverId, DirectoryEntry>>,
}

impl LocationIngest {
    pub fn new(
        config: LocationConfig,
        deadlines: DeadlineConfig,
        geo: Arc<DriverGeoIndex>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let directory_capacity =
            NonZeroUsize::new(config.directory_capacity.max(1)).expect("capacity is at least 1");
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(config.buffer_capacity)),
            batch_ready: Notify::new(),
            directory: Mutex::new(LruCache::new(directory_capacity)),
            config,
            deadlines,
            geo,
            store,
        }
    }

    /// One driver update. Geo upsert happens inline (only while the driver is
    /// `available`); the durable write is deferred to the flush worker.
    pub async fn submit(&self, driver_id: DriverId, point: GeoPoint) -> Result<()> {
        let entry = self.resolve(driver_id).await?;
        if entry.status == DriverStatus::Available {
            self.geo.upsert(entry.tier, driver_id, point)?;
        }

        let pending = {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            if buffer.len() >= self.config.buffer_capacity {
                buffer.pop_front();
            }
            buffer.push_back(LocationSample {
                driver_id,
                lat: point.lat,
                lng: point.lng,
                recorded_at: Utc::now(),
            });
            buffer.len()
        };
        if pending >= self.config.flush_batch {
            self.batch_ready.notify_one();
        }
        Ok(())
    }

    /// Drop the cached tier/status for a driver (status just changed).
    pub fn invalidate_directory(&self, driver_id: DriverId) {
        let mut directory = self.directory.lock().unwrap_or_else(PoisonError::into_inner);
        directory.pop(&driver_id);
    }

    async fn resolve(&self, driver_id: DriverId) -> Result<DirectoryEntry> {
        let ttl = Duration::from_secs(self.config.directory_ttl_seconds);
        {
            let mut directory = self.directory.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = directory.get(&driver_id) {
                if entry.cached_at.elapsed() <= ttl {
                    return Ok(*entry);
                }
                directory.pop(&driver_id);
            }
        }

        let driver = with_deadline(
            "state store",
            Duration::from_millis(self.deadlines.store_ms),
            self.store.get_driver(driver_id),
        )
        .await?
        .ok_or_else(|| DispatchError::not_found("driver", driver_id))?;

        let entry = DirectoryEntry {
            tier: driver.tier,
            status: driver.status,
            cached_at: Instant::now(),
        };
        let mut directory = self.directory.lock().unwrap_or_else(PoisonError::into_inner);
        directory.put(driver_id, entry);
        Ok(entry)
    }

    fn drain(&self) -> Vec<LocationSample> {
        let samples: Vec<LocationSample> = {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            buffer.drain(..).collect()
        };
        // Keep only the latest sample per driver.
        let mut latest: HashMap<DriverId, LocationSample> = HashMap::new();
        for sample in samples {
            latest.insert(sample.driver_id, sample);
        }
        latest.into_values().collect()
    }

    /// Drain and persist one batch. A timed-out write is retried once; a
    /// second failure drops the batch.
    pub async fn flush_once(&self) -> usize {
        let batch = self.drain();
        if batch.is_empty() {
            return 0;
        }
        let deadline = Duration::from_millis(self.deadlines.store_ms);
        for attempt in 0..2 {
            match with_deadline(
                "state store",
                deadline,
                self.store.update_driver_locations(&batch),
            )
            .await
            {
                Ok(()) => return batch.len(),
                Err(err) if attempt == 0 && err.is_retryable() => {
                    tracing::warn!(error = %err, rows = batch.len(), "location flush failed, retrying once");
                }
                Err(err) => {
                    tracing::warn!(error = %err, rows = batch.len(), "location flush dropped batch");
                    return 0;
                }
            }
        }
        0
    }

    /// Flush worker loop; drains the buffer one last time on shutdown.
    pub async fn run_flush_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.flush_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.batch_ready.notified() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
            self.flush_once().await;
        }
        self.flush_once().await;
    }

    pub fn pending(&self) -> usize {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

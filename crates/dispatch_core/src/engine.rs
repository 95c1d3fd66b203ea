//! Engine wiring and lifecycle.
//!
//! Components are injected at construction (store, PSP, authenticator) and
//! shared through [`EngineInner`]; there are no module-level singletons.
//! `start` spawns the supervised workers (matching, location flush, supply
//! sweep), `shutdown` signals them, drains the location buffer and joins.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::auth::Authenticator;
use crate::cache::RideStatusCache;
use crate::config::DispatchConfig;
use crate::entities::Tier;
use crate::error::{with_deadline, DispatchError, Result};
use crate::idempotency::IdempotencyCache;
use crate::location::LocationIngest;
use crate::matching::{AllocationLocks, MatchRequest, MatchingEngine};
use crate::ops;
use crate::pipeline::{AuthStage, IdempotencyStage, Pipeline, RequestContext, Response};
use crate::pricing::SurgeTracker;
use crate::psp::PaymentProcessor;
use crate::spatial::DriverGeoIndex;
use crate::store::StateStore;
use crate::workers::Supervisor;

/// Shared component graph behind all operation handlers.
pub struct EngineInner {
    pub(crate) config: DispatchConfig,
    pub(crate) store: Arc<dyn StateStore>,
    pub(crate) geo: Arc<DriverGeoIndex>,
    pub(crate) surge: Arc<SurgeTracker>,
    pub(crate) locks: Arc<AllocationLocks>,
    pub(crate) status_cache: Arc<RideStatusCache>,
    pub(crate) idempotency: Arc<IdempotencyCache>,
    pub(crate) ingest: Arc<LocationIngest>,
    pub(crate) psp: Arc<dyn PaymentProcessor>,
    pub(crate) matching: Arc<MatchingEngine>,
    matching_tx: mpsc::Sender<MatchRequest>,
}

impl EngineInner {
    /// Run a store future under the configured store deadline.
    pub(crate) async fn store_call<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        with_deadline(
            "state store",
            Duration::from_millis(self.config.deadlines.store_ms),
            fut,
        )
        .await
    }

    /// Hand a freshly created ride to the matching worker (bounded queue).
    pub(crate) async fn enqueue_match(&self, request: MatchRequest) -> Result<()> {
        self.matching_tx
            .send(request)
            .await
            .map_err(|_| DispatchError::Unavailable {
                dependency: "matching",
                details: "matching queue is closed".into(),
            })
    }
}

pub struct Engine {
    inner: Arc<EngineInner>,
    open_pipeline: Pipeline,
    auth_pipeline: Pipeline,
    idempotent_pipeline: Pipeline,
    register_driver: ops::RegisterDriver,
    set_driver_status: ops::SetDriverStatus,
    location_update: ops::LocationUpdate,
    create_ride: ops::CreateRide,
    get_ride: ops::GetRide,
    accept_ride: ops::AcceptRide,
    start_trip: ops::StartTrip,
    end_trip: ops::EndTrip,
    capture_payment: ops::CapturePayment,
    matching_rx: Mutex<Option<mpsc::Receiver<MatchRequest>>>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl Engine {
    pub fn new(
        config: DispatchConfig,
        store: Arc<dyn StateStore>,
        psp: Arc<dyn PaymentProcessor>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let geo = Arc::new(DriverGeoIndex::new(config.geo.index_resolution));
        let surge = Arc::new(SurgeTracker::new(&config.surge));
        let locks = Arc::new(AllocationLocks::new(Duration::from_millis(
            config.matching.lock_ttl_ms,
        )));
        let status_cache = Arc::new(RideStatusCache::new(&config.status_cache));
        let idempotency = Arc::new(IdempotencyCache::new(&config.idempotency, store.clone()));
        let ingest = Arc::new(LocationIngest::new(
            config.location,
            config.deadlines,
            geo.clone(),
            store.clone(),
        ));
        let matching = Arc::new(MatchingEngine::new(
            store.clone(),
            geo.clone(),
            locks.clone(),
            status_cache.clone(),
            config.matching,
            config.deadlines,
        ));
        let (matching_tx, matching_rx) = mpsc::channel(config.matching.queue_depth.max(1));

        let inner = Arc::new(EngineInner {
            config,
            store,
            geo,
            surge,
            locks,
            status_cache,
            idempotency,
            ingest,
            psp,
            matching,
            matching_tx,
        });

        let open_pipeline = Pipeline::default();
        let auth_pipeline = Pipeline::new(vec![Arc::new(AuthStage::new(authenticator.clone()))]);
        let idempotent_pipeline = Pipeline::new(vec![
            Arc::new(AuthStage::new(authenticator)),
            Arc::new(IdempotencyStage::new(inner.idempotency.clone())),
        ]);

        Self {
            register_driver: ops::RegisterDriver {
                inner: inner.clone(),
            },
            set_driver_status: ops::SetDriverStatus {
                inner: inner.clone(),
            },
            location_update: ops::LocationUpdate {
                inner: inner.clone(),
            },
            create_ride: ops::CreateRide {
                inner: inner.clone(),
            },
            get_ride: ops::GetRide {
                inner: inner.clone(),
            },
            accept_ride: ops::AcceptRide {
                inner: inner.clone(),
            },
            start_trip: ops::StartTrip {
                inner: inner.clone(),
            },
            end_trip: ops::EndTrip {
                inner: inner.clone(),
            },
            capture_payment: ops::CapturePayment {
                inner: inner.clone(),
            },
            open_pipeline,
            auth_pipeline,
            idempotent_pipeline,
            matching_rx: Mutex::new(Some(matching_rx)),
            supervisor: Mutex::new(None),
            inner,
        }
    }

    // ==================== Lifecycle ====================

    /// Spawn the background workers. Idempotent start is a conflict.
    pub fn start(&self) -> Result<()> {
        let matching_rx = self
            .matching_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| DispatchError::conflict("engine already started"))?;

        let mut supervisor = Supervisor::new();

        let matching = self.inner.matching.clone();
        supervisor.spawn("matching", move |mut shutdown| async move {
            let mut matching_rx = matching_rx;
            let mut attempts: JoinSet<()> = JoinSet::new();
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    request = matching_rx.recv() => {
                        let Some(request) = request else { break };
                        let matching = matching.clone();
                        attempts.spawn(async move {
                            if let Err(err) = matching.match_ride(&request).await {
                                tracing::error!(
                                    ride_id = %request.ride_id,
                                    error = %err,
                                    "matching attempt failed"
                                );
                            }
                        });
                    }
                    Some(_) = attempts.join_next(), if !attempts.is_empty() => {}
                }
            }
            attempts.shutdown().await;
        });

        let ingest = self.inner.ingest.clone();
        supervisor.spawn("location-flush", move |shutdown| async move {
            ingest.run_flush_loop(shutdown).await;
        });

        let geo = self.inner.geo.clone();
        let surge = self.inner.surge.clone();
        let locks = self.inner.locks.clone();
        let idempotency = self.inner.idempotency.clone();
        let sweep_interval = Duration::from_millis(self.inner.config.surge.sweep_interval_ms.max(1));
        supervisor.spawn("supply-sweep", move |mut shutdown| async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
                for tier in Tier::ALL {
                    for (driver, position) in geo.snapshot(tier) {
                        if let Err(err) = surge.observe_supply(driver, position) {
                            tracing::warn!(driver_id = %driver, error = %err, "supply sweep skipped driver");
                        }
                    }
                }
                locks.prune_expired();
                idempotency.prune_expired();
            }
        });

        let mut slot = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(supervisor);
        tracing::info!("dispatch engine started");
        Ok(())
    }

    /// Signal the workers, drain, and join. Safe to call once after `start`.
    pub async fn shutdown(&self) {
        let supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(supervisor) = supervisor {
            supervisor.shutdown().await;
            tracing::info!("dispatch engine stopped");
        }
    }

    // ==================== Component access ====================

    pub fn store(&self) -> Arc<dyn StateStore> {
        self.inner.store.clone()
    }

    pub fn geo(&self) -> Arc<DriverGeoIndex> {
        self.inner.geo.clone()
    }

    pub fn surge(&self) -> Arc<SurgeTracker> {
        self.inner.surge.clone()
    }

    pub fn allocation_locks(&self) -> Arc<AllocationLocks> {
        self.inner.locks.clone()
    }

    pub fn status_cache(&self) -> Arc<RideStatusCache> {
        self.inner.status_cache.clone()
    }

    pub fn location_ingest(&self) -> Arc<LocationIngest> {
        self.inner.ingest.clone()
    }

    // ==================== Operations ====================

    pub async fn register_driver(&self, request: &ops::RegisterDriverRequest) -> Result<Response> {
        let mut ctx = RequestContext::new(
            "register_driver",
            None,
            None,
            serde_json::to_value(request)?,
        );
        self.open_pipeline
            .execute(&mut ctx, &self.register_driver)
            .await
    }

    pub async fn set_driver_status(
        &self,
        token: &str,
        request: &ops::SetDriverStatusRequest,
    ) -> Result<Response> {
        let mut ctx = RequestContext::new(
            "set_driver_status",
            Some(token),
            None,
            serde_json::to_value(request)?,
        );
        self.auth_pipeline
            .execute(&mut ctx, &self.set_driver_status)
            .await
    }

    pub async fn location_update(
        &self,
        token: &str,
        request: &ops::LocationUpdateRequest,
    ) -> Result<Response> {
        let mut ctx = RequestContext::new(
            "location_update",
            Some(token),
            None,
            serde_json::to_value(request)?,
        );
        self.auth_pipeline
            .execute(&mut ctx, &self.location_update)
            .await
    }

    pub async fn create_ride(
        &self,
        token: &str,
        request: &ops::CreateRideRequest,
        client_key: Option<&str>,
    ) -> Result<Response> {
        let mut ctx = RequestContext::new(
            "create_ride",
            Some(token),
            client_key,
            serde_json::to_value(request)?,
        );
        self.idempotent_pipeline
            .execute(&mut ctx, &self.create_ride)
            .await
    }

    pub async fn get_ride(&self, token: &str, request: &ops::GetRideRequest) -> Result<Response> {
        let mut ctx =
            RequestContext::new("get_ride", Some(token), None, serde_json::to_value(request)?);
        self.auth_pipeline.execute(&mut ctx, &self.get_ride).await
    }

    pub async fn accept_ride(
        &self,
        token: &str,
        request: &ops::AcceptRideRequest,
    ) -> Result<Response> {
        let mut ctx = RequestContext::new(
            "accept_ride",
            Some(token),
            None,
            serde_json::to_value(request)?,
        );
        self.auth_pipeline
            .execute(&mut ctx, &self.accept_ride)
            .await
    }

    pub async fn start_trip(
        &self,
        token: &str,
        request: &ops::StartTripRequest,
    ) -> Result<Response> {
        let mut ctx = RequestContext::new(
            "start_trip",
            Some(token),
            None,
            serde_json::to_value(request)?,
        );
        self.auth_pipeline.execute(&mut ctx, &self.start_trip).await
    }

    pub async fn end_trip(&self, token: &str, request: &ops::EndTripRequest) -> Result<Response> {
        let mut ctx =
            RequestContext::new("end_trip", Some(token), None, serde_json::to_value(request)?);
        self.auth_pipeline.execute(&mut ctx, &self.end_trip).await
    }

    pub async fn capture_payment(
        &self,
        token: &str,
        request: &ops::CapturePaymentRequest,
        client_key: Option<&str>,
    ) -> Result<Response> {
        let mut ctx = RequestContext::new(
            "capture_payment",
            Some(token),
            client_key,
            serde_json::to_value(request)?,
        );
        self.idempotent_pipeline
            .execute(&mut ctx, &self.capture_payment)
            .await
    }
}

//! Authoritative, cached permission state for both subjects.
//!
//! Source precedence per subject:
//! - App: the platform preflight primitives, always authoritative.
//! - Engine: the engine's own report over its control endpoint, authoritative
//!   only when it answers. Otherwise `Unknown` with low confidence, never a
//!   heuristic guess.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use engine_control::EngineControl;
use permissions::{PermissionProbe, PermissionStatus};
use tokio::{sync::Mutex, task, time::timeout};
use tracing::{debug, trace, warn};

use crate::snapshot::{Confidence, PermissionSet, PermissionSnapshot};

/// Default cache lifetime.
pub const SNAPSHOT_TTL: Duration = Duration::from_millis(1500);
/// Default budget for the engine's self-report.
pub const ENGINE_TIMEOUT: Duration = Duration::from_millis(1200);
/// Default budget for the platform primitives.
pub const LOCAL_TIMEOUT: Duration = Duration::from_millis(1000);

/// Oracle timings.
#[derive(Debug, Clone)]
pub struct OracleCfg {
    /// Snapshots younger than this are served from cache.
    pub ttl: Duration,
    /// Budget for the engine permission query.
    pub engine_timeout: Duration,
    /// Budget for the local platform query.
    pub local_timeout: Duration,
}

impl Default for OracleCfg {
    fn default() -> Self {
        Self {
            ttl: SNAPSHOT_TTL,
            engine_timeout: ENGINE_TIMEOUT,
            local_timeout: LOCAL_TIMEOUT,
        }
    }
}

/// Cache state, only touched under the oracle's lock.
#[derive(Debug, Default)]
struct Cache {
    /// Last computed snapshot, if not invalidated.
    snapshot: Option<Arc<PermissionSnapshot>>,
    /// Timestamp of the most recent snapshot ever produced.
    last_timestamp: Option<Instant>,
}

/// Produces [`PermissionSnapshot`]s, hiding that the two subjects are
/// answered by different sources.
///
/// Computation happens under an async lock, so concurrent callers share one
/// check and a refresh requested after another caller's check started still
/// waits for, and then supersedes, that check.
pub struct PermissionOracle {
    /// Timings.
    cfg: OracleCfg,
    /// Platform permission primitives for this process.
    probe: Arc<dyn PermissionProbe>,
    /// Control client for the engine's self-report.
    control: Arc<dyn EngineControl>,
    /// Snapshot cache; also the serialization point.
    cache: Mutex<Cache>,
}

impl PermissionOracle {
    /// Create an oracle over the given sources.
    pub fn new(
        cfg: OracleCfg,
        probe: Arc<dyn PermissionProbe>,
        control: Arc<dyn EngineControl>,
    ) -> Self {
        Self {
            cfg,
            probe,
            control,
            cache: Mutex::new(Cache::default()),
        }
    }

    /// Cached snapshot if younger than the TTL, otherwise a fresh one.
    pub async fn current_snapshot(&self) -> Arc<PermissionSnapshot> {
        let mut cache = self.cache.lock().await;
        if let Some(snap) = cache.snapshot.as_ref()
            && snap.timestamp.elapsed() < self.cfg.ttl
        {
            trace!(age = ?snap.timestamp.elapsed(), "permission snapshot cache hit");
            return snap.clone();
        }
        self.refresh_locked(&mut cache).await
    }

    /// Discard the cache and recompute.
    pub async fn force_refresh(&self) -> Arc<PermissionSnapshot> {
        let mut cache = self.cache.lock().await;
        cache.snapshot = None;
        self.refresh_locked(&mut cache).await
    }

    /// Discard the cache; the next read recomputes.
    pub async fn invalidate_cache(&self) {
        self.cache.lock().await.snapshot = None;
    }

    /// Compute, timestamp and cache a new snapshot.
    async fn refresh_locked(&self, cache: &mut Cache) -> Arc<PermissionSnapshot> {
        let (app, engine) = tokio::join!(self.check_app(), self.check_engine());
        let mut timestamp = Instant::now();
        // Snapshot timestamps strictly increase, even on coarse clocks.
        if let Some(prev) = cache.last_timestamp
            && timestamp <= prev
        {
            timestamp = prev + Duration::from_nanos(1);
        }
        let snap = Arc::new(PermissionSnapshot::new(app, engine, timestamp));
        debug!(
            app_ax = %snap.app.accessibility,
            app_input = %snap.app.input_monitoring,
            engine_ax = %snap.engine.accessibility,
            engine_input = %snap.engine.input_monitoring,
            engine_source = snap.engine.source,
            "permission snapshot refreshed"
        );
        cache.last_timestamp = Some(timestamp);
        cache.snapshot = Some(snap.clone());
        snap
    }

    /// Query the platform primitives on a blocking thread, bounded.
    async fn check_app(&self) -> PermissionSet {
        let probe = self.probe.clone();
        let query = task::spawn_blocking(move || (probe.accessibility(), probe.input_monitoring()));
        match timeout(self.cfg.local_timeout, query).await {
            Ok(Ok((ax, input))) => PermissionSet::new(ax, input, "platform", Confidence::High),
            Ok(Err(e)) => {
                warn!(error = %e, "platform permission query failed");
                let detail = format!("platform query failed: {e}");
                PermissionSet::new(
                    PermissionStatus::Error(detail.clone()),
                    PermissionStatus::Error(detail),
                    "platform",
                    Confidence::Low,
                )
            }
            Err(_) => {
                warn!(budget = ?self.cfg.local_timeout, "platform permission query timed out");
                PermissionSet::unknown("platform-timeout")
            }
        }
    }

    /// Ask the engine for its self-reported permissions, bounded.
    async fn check_engine(&self) -> PermissionSet {
        if !self.control.transport_enabled() {
            return PermissionSet::unknown("tcp-disabled");
        }
        let budget = self.cfg.engine_timeout;
        match timeout(budget, self.control.check_permissions(budget)).await {
            Ok(Ok(reported)) => PermissionSet::new(
                PermissionStatus::from_reported(&reported.accessibility),
                PermissionStatus::from_reported(&reported.input_monitoring),
                "engine-control",
                Confidence::High,
            ),
            Ok(Err(e)) if e.is_unreachable() => {
                debug!(error = %e, "engine not reachable for permission check");
                PermissionSet::unknown("engine-unreachable")
            }
            Ok(Err(e)) => {
                debug!(error = %e, "engine permission check failed");
                PermissionSet::unknown("engine-error")
            }
            Err(_) => {
                debug!(?budget, "engine permission check timed out");
                PermissionSet::unknown("engine-unreachable")
            }
        }
    }
}

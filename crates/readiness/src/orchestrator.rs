//! The readiness state machine.
//!
//! [`Orchestrator::perform_validation`] is the only way state changes. Each
//! call allocates a run with a fresh id and a cancellation token, cancels the
//! previous run, and publishes only if it is still the current run when it
//! finishes. Published reports are broadcast on a `watch` channel.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant, SystemTime},
};

use engine_control::ServiceHealth;
use futures::{FutureExt, future::BoxFuture};
use ownership::{ConflictResolution, Ownership, ProcessTracker};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::{sync::watch, task};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    environment::EnvironmentProbe,
    followup::FollowUp,
    issues::{
        Issue, IssueCategory, Severity, ValidationState, conflict_issues, only_startup_blockers,
        ownership_issues, permission_issues, reduce,
    },
    oracle::PermissionOracle,
};

/// Minimum spacing between unforced runs.
pub const THROTTLE: Duration = Duration::from_secs(2);
/// How long a run waits for the engine's control endpoint.
pub const READINESS_TIMEOUT: Duration = Duration::from_secs(10);
/// Window after [`Orchestrator::configure`] during which start-up noise is held.
pub const WARMUP_WINDOW: Duration = Duration::from_secs(3);
/// Delay before re-running a run that was held during warm-up.
pub const WARMUP_FOLLOWUP: Duration = Duration::from_secs(1);

/// Orchestrator timings. The warm-up values are tuned to the engine's
/// observed start-up latency.
#[derive(Debug, Clone)]
pub struct OrchestratorCfg {
    /// Unforced runs within this long of the last completion are dropped.
    pub throttle: Duration,
    /// Budget for waiting on the control endpoint.
    pub readiness_timeout: Duration,
    /// Warm-up window measured from configuration.
    pub warmup_window: Duration,
    /// Follow-up delay while held in warm-up.
    pub warmup_followup: Duration,
}

impl Default for OrchestratorCfg {
    fn default() -> Self {
        Self {
            throttle: THROTTLE,
            readiness_timeout: READINESS_TIMEOUT,
            warmup_window: WARMUP_WINDOW,
            warmup_followup: WARMUP_FOLLOWUP,
        }
    }
}

/// What a run concluded about the engine service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    /// The control endpoint answered.
    Running,
    /// Not answering, but a process we own is alive.
    Starting,
    /// Neither.
    Stopped,
}

/// Published result of the last completed current run.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    /// Coarse state.
    pub state: ValidationState,
    /// All issues found, in discovery order.
    pub issues: Vec<Issue>,
    /// Wall-clock completion time of the run; `None` before the first.
    pub last_validation: Option<SystemTime>,
    /// Id of the run that produced this report; 0 before the first.
    pub run_id: u64,
    /// Engine status seen by that run.
    pub engine: Option<EngineStatus>,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self {
            state: ValidationState::Checking,
            issues: Vec::new(),
            last_validation: None,
            run_id: 0,
            engine: None,
        }
    }
}

/// How a call to [`Orchestrator::perform_validation`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Dropped by the throttle; nothing ran.
    Throttled,
    /// No [`ServiceHealth`] configured yet; nothing ran.
    Unconfigured,
    /// Superseded by a newer run before publishing.
    Cancelled,
    /// Published a report with this state.
    Published(ValidationState),
}

/// Identity of one run.
#[derive(Debug, Clone)]
struct ValidationRun {
    /// Unique, increasing.
    id: u64,
    /// Start time, for logging.
    started_at: Instant,
    /// Cancelled when a newer run starts.
    token: CancellationToken,
}

/// Mutable run bookkeeping, guarded by one lock.
#[derive(Default)]
struct RunState {
    /// Last allocated run id.
    next_id: u64,
    /// The in-flight current run, if any.
    current: Option<ValidationRun>,
    /// When the last run published.
    last_completed: Option<Instant>,
    /// Engine readiness probe; `None` until configured.
    health: Option<Arc<dyn ServiceHealth>>,
    /// When `health` was attached; starts the warm-up window.
    configured_at: Option<Instant>,
}

/// Shared orchestrator state.
struct Inner {
    /// Timings.
    cfg: OrchestratorCfg,
    /// Permission source.
    oracle: Arc<PermissionOracle>,
    /// Engine ownership source.
    tracker: Arc<ProcessTracker>,
    /// Installation and platform checks.
    environment: Arc<dyn EnvironmentProbe>,
    /// Run bookkeeping.
    runs: Mutex<RunState>,
    /// Publication channel.
    report: watch::Sender<ValidationReport>,
    /// Warm-up follow-up slot.
    followup: FollowUp,
    /// Post-startup revalidation slot.
    revalidate: FollowUp,
    /// Reduced-scope mode for the first run after launch.
    startup_mode: AtomicBool,
    /// Number of runs that published.
    completed_runs: AtomicU64,
}

/// Readiness orchestrator handle. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Orchestrator {
    /// Shared state.
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Build an unconfigured orchestrator. Runs report
    /// [`RunOutcome::Unconfigured`] until [`configure`](Self::configure).
    pub fn new(
        cfg: OrchestratorCfg,
        oracle: Arc<PermissionOracle>,
        tracker: Arc<ProcessTracker>,
        environment: Arc<dyn EnvironmentProbe>,
    ) -> Self {
        let (report, _) = watch::channel(ValidationReport::default());
        Self {
            inner: Arc::new(Inner {
                cfg,
                oracle,
                tracker,
                environment,
                runs: Mutex::new(RunState::default()),
                report,
                followup: FollowUp::new("warmup"),
                revalidate: FollowUp::new("startup-revalidate"),
                startup_mode: AtomicBool::new(false),
                completed_runs: AtomicU64::new(0),
            }),
        }
    }

    /// Attach the engine readiness probe and start the warm-up window.
    pub fn configure(&self, health: Arc<dyn ServiceHealth>) {
        let mut st = self.inner.runs.lock();
        st.health = Some(health);
        st.configured_at = Some(Instant::now());
        debug!("orchestrator configured");
    }

    /// Mark the next run as a reduced-scope start-up run. That run skips the
    /// conflict scan and schedules one full run with a cold permission cache.
    pub fn set_startup_mode(&self, on: bool) {
        self.inner.startup_mode.store(on, Ordering::SeqCst);
    }

    /// Whether the next run will be a start-up run.
    pub fn startup_mode(&self) -> bool {
        self.inner.startup_mode.load(Ordering::SeqCst)
    }

    /// Subscribe to published reports.
    pub fn subscribe(&self) -> watch::Receiver<ValidationReport> {
        self.inner.report.subscribe()
    }

    /// The last published report.
    pub fn report(&self) -> ValidationReport {
        self.inner.report.borrow().clone()
    }

    /// The last published state.
    pub fn state(&self) -> ValidationState {
        self.inner.report.borrow().state
    }

    /// Number of runs that have published so far.
    pub fn completed_runs(&self) -> u64 {
        self.inner.completed_runs.load(Ordering::SeqCst)
    }

    /// The permission oracle this orchestrator reads.
    pub fn oracle(&self) -> &Arc<PermissionOracle> {
        &self.inner.oracle
    }

    /// The ownership tracker this orchestrator reads.
    pub fn tracker(&self) -> &Arc<ProcessTracker> {
        &self.inner.tracker
    }

    /// Cancel the in-flight run and any scheduled follow-ups.
    pub fn cancel(&self) {
        if let Some(run) = self.inner.runs.lock().current.take() {
            run.token.cancel();
        }
        self.inner.followup.cancel();
        self.inner.revalidate.cancel();
    }

    /// Run a validation, or drop the request if unforced and throttled.
    ///
    /// The returned future is `'static` so follow-up runs can be spawned.
    pub fn perform_validation(&self, force: bool) -> BoxFuture<'static, RunOutcome> {
        let this = self.clone();
        async move { this.run_validation(force, None).await }.boxed()
    }

    /// A forced run scheduled by run `after`. It is dropped if any run
    /// started after `after` by the time it fires.
    fn follow_up(&self, after: u64) -> BoxFuture<'static, ()> {
        let this = self.clone();
        async move {
            this.run_validation(true, Some(after)).await;
        }
        .boxed()
    }

    /// Body of [`perform_validation`](Self::perform_validation).
    async fn run_validation(&self, force: bool, after: Option<u64>) -> RunOutcome {
        let cfg = &self.inner.cfg;
        let (run, health, configured_at) = {
            let mut st = self.inner.runs.lock();
            if !force
                && let Some(done) = st.last_completed
                && done.elapsed() < cfg.throttle
            {
                debug!(since = ?done.elapsed(), "validation throttled");
                return RunOutcome::Throttled;
            }
            if let Some(after) = after
                && st.next_id != after
            {
                debug!(after, newest = st.next_id, "follow-up superseded before it ran");
                return RunOutcome::Cancelled;
            }
            let Some(health) = st.health.clone() else {
                warn!("validation requested before the engine supervisor was configured");
                return RunOutcome::Unconfigured;
            };
            if let Some(prev) = st.current.take() {
                debug!(run = prev.id, "cancelling superseded validation run");
                prev.token.cancel();
            }
            st.next_id += 1;
            let run = ValidationRun {
                id: st.next_id,
                started_at: Instant::now(),
                token: CancellationToken::new(),
            };
            st.current = Some(run.clone());
            self.inner.followup.cancel();
            self.inner.revalidate.cancel();
            (run, health, st.configured_at)
        };
        let startup = self.startup_mode();
        debug!(run = run.id, force, startup, "validation run started");

        let ready = tokio::select! {
            ready = health.wait_for_service_ready(cfg.readiness_timeout) => ready,
            _ = run.token.cancelled() => return self.abandon(&run, "readiness wait"),
        };
        if !ready {
            info!(run = run.id, "engine control endpoint not ready; diagnosing anyway");
        }

        if !self.is_current(&run) {
            return self.abandon(&run, "before permission check");
        }
        let snapshot = tokio::select! {
            snap = self.inner.oracle.current_snapshot() => snap,
            _ = run.token.cancelled() => return self.abandon(&run, "permission check"),
        };

        if !self.is_current(&run) {
            return self.abandon(&run, "before ownership check");
        }
        let tracker = self.inner.tracker.clone();
        let environment = self.inner.environment.clone();
        let scan = task::spawn_blocking(move || {
            let ownership = tracker.check_ownership();
            let conflicts = (!startup).then(|| tracker.detect_conflicts());
            (ownership, conflicts, environment.issues())
        });
        let scanned = tokio::select! {
            scanned = scan => scanned,
            _ = run.token.cancelled() => return self.abandon(&run, "ownership check"),
        };

        let mut issues = permission_issues(&snapshot);
        let engine = match scanned {
            Ok((ownership, conflicts, env_issues)) => {
                issues.extend(env_issues);
                let ownership = match ownership {
                    Ok(o) => o,
                    Err(e) => {
                        warn!(error = %e, "engine ownership check failed");
                        issues.push(Issue::new(
                            IssueCategory::Daemon,
                            Severity::Warning,
                            "Could not read engine ownership record",
                            e.to_string(),
                        ));
                        Ownership::Absent
                    }
                };
                let status = engine_status(ready, ownership);
                issues.extend(status_issues(status, cfg.readiness_timeout));
                issues.extend(ownership_issues(ownership));
                issues.extend(conflicts.into_iter().flat_map(conflict_result));
                status
            }
            Err(e) => {
                warn!(error = %e, "process scan task failed");
                let status = engine_status(ready, Ownership::Absent);
                issues.extend(status_issues(status, cfg.readiness_timeout));
                status
            }
        };

        let mut state = reduce(&issues, engine == EngineStatus::Running);
        let warming = configured_at.is_some_and(|t| t.elapsed() < cfg.warmup_window);
        let hold = state.is_failed()
            && engine == EngineStatus::Starting
            && warming
            && only_startup_blockers(&issues);
        if hold {
            debug!(run = run.id, "engine warming up; holding at checking");
            state = ValidationState::Checking;
        }

        if startup && self.startup_mode() {
            // The full run that follows must not reuse this run's snapshot.
            tokio::select! {
                _ = self.inner.oracle.invalidate_cache() => {}
                _ = run.token.cancelled() => return self.abandon(&run, "cache invalidation"),
            }
        }

        {
            let mut st = self.inner.runs.lock();
            let current =
                st.next_id == run.id && st.current.as_ref().is_some_and(|c| c.id == run.id);
            if !current || run.token.is_cancelled() {
                drop(st);
                return self.abandon(&run, "publish");
            }
            st.current = None;
            st.last_completed = Some(Instant::now());
            self.inner.report.send_replace(ValidationReport {
                state,
                issues,
                last_validation: Some(SystemTime::now()),
                run_id: run.id,
                engine: Some(engine),
            });
            self.inner.completed_runs.fetch_add(1, Ordering::SeqCst);

            // Follow-ups are only scheduled by the newest run.
            if hold {
                self.inner
                    .followup
                    .schedule(cfg.warmup_followup, self.follow_up(run.id));
            }
            if startup
                && self
                    .inner
                    .startup_mode
                    .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                debug!(run = run.id, "start-up run done; scheduling full revalidation");
                self.inner
                    .revalidate
                    .schedule(Duration::ZERO, self.follow_up(run.id));
            }
        }
        info!(
            run = run.id,
            ?state,
            ?engine,
            took = ?run.started_at.elapsed(),
            "validation published"
        );
        RunOutcome::Published(state)
    }

    /// Whether `run` is still the newest, uncancelled run.
    fn is_current(&self, run: &ValidationRun) -> bool {
        !run.token.is_cancelled()
            && self
                .inner
                .runs
                .lock()
                .current
                .as_ref()
                .is_some_and(|c| c.id == run.id)
    }

    /// Log and report a superseded run.
    fn abandon(&self, run: &ValidationRun, at: &str) -> RunOutcome {
        debug!(run = run.id, at, "validation run superseded");
        RunOutcome::Cancelled
    }
}

/// Classify the engine from the readiness answer and ownership.
fn engine_status(ready: bool, ownership: Ownership) -> EngineStatus {
    if ready {
        EngineStatus::Running
    } else if ownership.is_owned() {
        EngineStatus::Starting
    } else {
        EngineStatus::Stopped
    }
}

/// Issues implied by the engine status.
fn status_issues(status: EngineStatus, waited: Duration) -> Option<Issue> {
    match status {
        EngineStatus::Running => None,
        EngineStatus::Starting => Some(Issue::new(
            IssueCategory::Daemon,
            Severity::Error,
            "Remapping engine is not responding",
            format!("its control endpoint did not answer within {waited:?}"),
        )),
        EngineStatus::Stopped => Some(Issue::new(
            IssueCategory::BackgroundServices,
            Severity::Error,
            "Remapping engine is not running",
            "start it to enable remapping",
        )),
    }
}

/// Conflict issues, or a warning if the scan itself failed.
fn conflict_result(res: ownership::Result<ConflictResolution>) -> Vec<Issue> {
    match res {
        Ok(res) => conflict_issues(&res),
        Err(e) => {
            warn!(error = %e, "engine conflict scan failed");
            vec![Issue::new(
                IssueCategory::Conflicts,
                Severity::Warning,
                "Could not scan for other engine instances",
                e.to_string(),
            )]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_status_prefers_reachability() {
        assert_eq!(engine_status(true, Ownership::Absent), EngineStatus::Running);
        assert_eq!(
            engine_status(false, Ownership::Owned(42)),
            EngineStatus::Starting
        );
        assert_eq!(
            engine_status(false, Ownership::Orphaned(42)),
            EngineStatus::Stopped
        );
    }

    #[test]
    fn starting_engine_is_a_startup_blocker() {
        let issues: Vec<Issue> = status_issues(EngineStatus::Starting, READINESS_TIMEOUT)
            .into_iter()
            .collect();
        assert!(issues[0].is_blocking());
        assert!(only_startup_blockers(&issues));
    }
}

use std::{sync::Arc, time::Duration};

use engine_control::{MockControl, MockHealth};
use ownership::{MockProcesses, ProcessTracker, TrackerCfg};
use permissions::{MockProbe, PermissionStatus};
use readiness::{
    EngineStatus, IssueCategory, OracleCfg, Orchestrator, OrchestratorCfg, PermissionOracle,
    RunOutcome, StaticEnvironment, ValidationReport, ValidationState,
};
use tempfile::TempDir;
use tokio::{
    sync::watch,
    time::{sleep, timeout},
};

struct Rig {
    orch: Orchestrator,
    probe: Arc<MockProbe>,
    control: Arc<MockControl>,
    health: Arc<MockHealth>,
    procs: Arc<MockProcesses>,
    tracker: Arc<ProcessTracker>,
    _dir: TempDir,
}

fn rig(cfg: OrchestratorCfg) -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(MockProbe::granted());
    let control = Arc::new(MockControl::reachable());
    let health = Arc::new(MockHealth::new(true));
    let procs = Arc::new(MockProcesses::new());
    let oracle = Arc::new(PermissionOracle::new(
        OracleCfg {
            ttl: Duration::ZERO,
            ..OracleCfg::default()
        },
        probe.clone(),
        control.clone(),
    ));
    let tracker = Arc::new(ProcessTracker::new(
        TrackerCfg::new(dir.path().join("engine.pid"), "engine"),
        procs.clone(),
    ));
    let orch = Orchestrator::new(
        cfg,
        oracle,
        tracker.clone(),
        Arc::new(StaticEnvironment::default()),
    );
    Rig {
        orch,
        probe,
        control,
        health,
        procs,
        tracker,
        _dir: dir,
    }
}

fn configured(cfg: OrchestratorCfg) -> Rig {
    let r = rig(cfg);
    r.orch.configure(r.health.clone());
    r
}

/// Wait for the next published report.
async fn next_report(rx: &mut watch::Receiver<ValidationReport>) -> ValidationReport {
    timeout(Duration::from_secs(5), rx.changed())
        .await
        .expect("no report published")
        .unwrap();
    rx.borrow_and_update().clone()
}

/// Record a live engine we own that has not opened its endpoint yet.
fn owned_starting_engine(r: &Rig) {
    r.procs.spawn(4242, "/opt/bin/engine --daemon");
    r.tracker
        .register_started_process(4242, "/opt/bin/engine --daemon")
        .unwrap();
    r.health.set_ready(false);
    r.control.set_reachable(false);
}

#[tokio::test]
async fn unconfigured_leaves_state_unresolved() {
    let r = rig(OrchestratorCfg::default());
    assert_eq!(r.orch.perform_validation(true).await, RunOutcome::Unconfigured);
    assert_eq!(r.orch.state(), ValidationState::Checking);
    assert_eq!(r.orch.completed_runs(), 0);

    r.orch.configure(r.health.clone());
    assert_eq!(
        r.orch.perform_validation(false).await,
        RunOutcome::Published(ValidationState::Success)
    );
}

#[tokio::test]
async fn healthy_system_succeeds() {
    let r = configured(OrchestratorCfg::default());
    let outcome = r.orch.perform_validation(false).await;
    assert_eq!(outcome, RunOutcome::Published(ValidationState::Success));

    let report = r.orch.report();
    assert!(report.issues.is_empty());
    assert!(report.last_validation.is_some());
    assert_eq!(report.run_id, 1);
    assert_eq!(report.engine, Some(EngineStatus::Running));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn newer_run_wins_over_slower_older_run() {
    let r = configured(OrchestratorCfg::default());
    r.probe.set(PermissionStatus::Denied, PermissionStatus::Granted);
    r.health.push_delay(Duration::from_millis(300));

    let a = tokio::spawn(r.orch.perform_validation(true));
    sleep(Duration::from_millis(50)).await;
    r.probe.set(PermissionStatus::Granted, PermissionStatus::Granted);
    let b = r.orch.perform_validation(true).await;

    assert_eq!(b, RunOutcome::Published(ValidationState::Success));
    assert_eq!(a.await.unwrap(), RunOutcome::Cancelled);

    sleep(Duration::from_millis(400)).await;
    let report = r.orch.report();
    assert_eq!(report.state, ValidationState::Success);
    assert_eq!(report.run_id, 2);
    assert_eq!(r.orch.completed_runs(), 1);
}

#[tokio::test]
async fn conflicts_do_not_block() {
    let r = configured(OrchestratorCfg::default());
    r.procs.spawn(777, "/usr/local/bin/engine --cfg other.kbd");

    let outcome = r.orch.perform_validation(true).await;
    assert_eq!(outcome, RunOutcome::Published(ValidationState::Success));
    let report = r.orch.report();
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].category, IssueCategory::Conflicts);
    assert!(!report.issues[0].is_blocking());
    assert!(r.procs.signals().is_empty());
}

#[tokio::test]
async fn denied_permission_fails() {
    let r = configured(OrchestratorCfg::default());
    r.probe.set(PermissionStatus::Granted, PermissionStatus::Denied);
    r.control.set_permissions("denied", "granted");

    let outcome = r.orch.perform_validation(true).await;
    assert_eq!(
        outcome,
        RunOutcome::Published(ValidationState::Failed {
            blocking: 2,
            total: 2
        })
    );
}

#[tokio::test]
async fn unforced_runs_are_throttled() {
    let r = configured(OrchestratorCfg::default());
    assert!(matches!(
        r.orch.perform_validation(false).await,
        RunOutcome::Published(_)
    ));
    assert_eq!(r.orch.perform_validation(false).await, RunOutcome::Throttled);
    assert_eq!(r.orch.completed_runs(), 1);

    assert!(matches!(
        r.orch.perform_validation(true).await,
        RunOutcome::Published(_)
    ));
    assert_eq!(r.orch.completed_runs(), 2);
}

#[tokio::test]
async fn throttle_expires() {
    let r = configured(OrchestratorCfg {
        throttle: Duration::from_millis(50),
        ..OrchestratorCfg::default()
    });
    r.orch.perform_validation(false).await;
    sleep(Duration::from_millis(80)).await;
    assert!(matches!(
        r.orch.perform_validation(false).await,
        RunOutcome::Published(_)
    ));
}

#[tokio::test]
async fn stopped_engine_fails_even_during_warmup() {
    let r = configured(OrchestratorCfg::default());
    r.health.set_ready(false);
    r.control.set_reachable(false);

    let outcome = r.orch.perform_validation(true).await;
    assert!(matches!(
        outcome,
        RunOutcome::Published(ValidationState::Failed { blocking: 1, .. })
    ));
    let report = r.orch.report();
    assert_eq!(report.engine, Some(EngineStatus::Stopped));
    assert!(
        report
            .issues
            .iter()
            .any(|i| i.category == IssueCategory::BackgroundServices)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn starting_engine_is_held_then_followed_up() {
    let r = configured(OrchestratorCfg {
        warmup_followup: Duration::from_millis(100),
        ..OrchestratorCfg::default()
    });
    owned_starting_engine(&r);
    let mut rx = r.orch.subscribe();

    let outcome = r.orch.perform_validation(true).await;
    assert_eq!(outcome, RunOutcome::Published(ValidationState::Checking));
    let held = next_report(&mut rx).await;
    assert_eq!(held.engine, Some(EngineStatus::Starting));

    r.health.set_ready(true);
    r.control.set_reachable(true);
    let settled = next_report(&mut rx).await;
    assert_eq!(settled.state, ValidationState::Success);
    assert_eq!(settled.engine, Some(EngineStatus::Running));
    assert_eq!(r.orch.completed_runs(), 2);
}

#[tokio::test]
async fn starting_engine_fails_after_warmup_window() {
    let r = configured(OrchestratorCfg {
        warmup_window: Duration::ZERO,
        ..OrchestratorCfg::default()
    });
    owned_starting_engine(&r);

    let outcome = r.orch.perform_validation(true).await;
    assert!(matches!(
        outcome,
        RunOutcome::Published(ValidationState::Failed { blocking: 1, .. })
    ));
    assert_eq!(r.orch.report().engine, Some(EngineStatus::Starting));
}

#[tokio::test]
async fn warmup_does_not_hide_permission_blockers() {
    let r = configured(OrchestratorCfg::default());
    owned_starting_engine(&r);
    r.probe.set(PermissionStatus::Denied, PermissionStatus::Granted);

    let outcome = r.orch.perform_validation(true).await;
    assert!(matches!(
        outcome,
        RunOutcome::Published(ValidationState::Failed { blocking: 2, .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn startup_run_is_followed_by_one_full_run() {
    let r = configured(OrchestratorCfg::default());
    r.procs.spawn(777, "/usr/local/bin/engine");
    r.orch.set_startup_mode(true);
    r.health.push_delay(Duration::ZERO);
    r.health.push_delay(Duration::from_millis(200));
    let mut rx = r.orch.subscribe();

    r.orch.perform_validation(true).await;
    let first = next_report(&mut rx).await;
    assert!(first.issues.is_empty());
    assert!(!r.orch.startup_mode());

    let second = next_report(&mut rx).await;
    assert_eq!(second.issues.len(), 1);
    assert_eq!(second.issues[0].category, IssueCategory::Conflicts);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(r.orch.completed_runs(), 2);
    assert_eq!(r.health.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_stops_in_flight_run() {
    let r = configured(OrchestratorCfg::default());
    r.health.push_delay(Duration::from_millis(300));

    let run = tokio::spawn(r.orch.perform_validation(true));
    sleep(Duration::from_millis(50)).await;
    r.orch.cancel();

    assert_eq!(run.await.unwrap(), RunOutcome::Cancelled);
    assert_eq!(r.orch.completed_runs(), 0);
    assert_eq!(r.orch.state(), ValidationState::Checking);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn startup_run_superseded_while_invalidating_does_not_cancel_newer_run() {
    let r = configured(OrchestratorCfg::default());
    r.orch.set_startup_mode(true);
    r.control.set_delay(Duration::from_millis(150));

    let a = tokio::spawn(r.orch.perform_validation(true));
    sleep(Duration::from_millis(50)).await;
    // Holds the oracle until well after run A has its snapshot.
    let oracle = r.orch.oracle().clone();
    let refresh = tokio::spawn(async move { oracle.force_refresh().await });
    sleep(Duration::from_millis(150)).await;

    let b = r.orch.perform_validation(true).await;
    assert_eq!(b, RunOutcome::Published(ValidationState::Success));
    assert_eq!(a.await.unwrap(), RunOutcome::Cancelled);
    refresh.await.unwrap();

    sleep(Duration::from_millis(500)).await;
    assert!(!r.orch.startup_mode());
    assert_eq!(r.orch.completed_runs(), 2);
    assert_eq!(r.orch.state(), ValidationState::Success);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn newer_run_after_startup_publish_is_not_cancelled() {
    let r = configured(OrchestratorCfg::default());
    r.orch.set_startup_mode(true);
    r.health.push_delay(Duration::ZERO);
    r.health.push_delay(Duration::from_millis(100));
    r.health.push_delay(Duration::from_millis(100));

    let a = r.orch.perform_validation(true).await;
    assert_eq!(a, RunOutcome::Published(ValidationState::Success));
    let b = r.orch.perform_validation(true).await;
    assert_eq!(b, RunOutcome::Published(ValidationState::Success));

    sleep(Duration::from_millis(300)).await;
    assert_eq!(r.orch.completed_runs(), 2);
    assert_eq!(r.orch.state(), ValidationState::Success);
}

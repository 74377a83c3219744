use std::{
    fs,
    path::Path,
    sync::Arc,
    time::{Duration, SystemTime},
};

use ownership::{
    EngineProcess, LaunchCfg, MockProcesses, Ownership, PidRecord, ProcessTracker,
    SystemProcesses, TrackerCfg, record,
};

fn tracker(dir: &Path, procs: Arc<MockProcesses>) -> ProcessTracker {
    let mut cfg = TrackerCfg::new(dir.join("engine.pid"), "engine");
    cfg.term_grace = Duration::from_millis(50);
    ProcessTracker::new(cfg, procs)
}

/// Write a record for `pid` that is `age` old.
fn backdate(path: &Path, pid: u32, age: Duration) {
    let mut rec = PidRecord::new(pid, "/opt/bin/engine", "keygate/1");
    rec.start_time = SystemTime::now() - age;
    record::store(path, &rec).unwrap();
}

#[test]
fn no_record_is_not_owned() {
    let dir = tempfile::tempdir().unwrap();
    let t = tracker(dir.path(), Arc::new(MockProcesses::new()));
    assert_eq!(t.check_ownership().unwrap(), Ownership::Absent);
    assert_eq!(t.check_ownership().unwrap().as_pair(), (false, None));
}

#[test]
fn dead_pid_clears_record() {
    let dir = tempfile::tempdir().unwrap();
    let procs = Arc::new(MockProcesses::new());
    let t = tracker(dir.path(), procs.clone());
    t.register_started_process(4242, "/opt/bin/engine").unwrap();
    assert!(t.cfg().pid_file.exists());

    assert_eq!(t.check_ownership().unwrap().as_pair(), (false, None));
    assert!(!t.cfg().pid_file.exists());
}

#[test]
fn fresh_live_record_is_owned() {
    let dir = tempfile::tempdir().unwrap();
    let procs = Arc::new(MockProcesses::new());
    procs.spawn(4242, "/opt/bin/engine");
    let t = tracker(dir.path(), procs.clone());
    t.register_started_process(4242, "/opt/bin/engine").unwrap();

    assert_eq!(t.check_ownership().unwrap().as_pair(), (true, Some(4242)));
    let rec = t.record().unwrap().unwrap();
    assert_eq!(rec.pid, 4242);
    assert!(rec.owner.starts_with("keygate/"));
}

#[test]
fn stale_live_record_is_orphaned_and_kept() {
    let dir = tempfile::tempdir().unwrap();
    let procs = Arc::new(MockProcesses::new());
    procs.spawn(4242, "/opt/bin/engine");
    let t = tracker(dir.path(), procs.clone());
    backdate(&t.cfg().pid_file, 4242, Duration::from_secs(2 * 60 * 60));

    assert_eq!(t.check_ownership().unwrap(), Ownership::Orphaned(4242));
    assert_eq!(t.check_ownership().unwrap().as_pair(), (false, Some(4242)));
    assert!(t.cfg().pid_file.exists());

    // Natural death collapses straight to absent.
    procs.exit(4242);
    assert_eq!(t.check_ownership().unwrap(), Ownership::Absent);
    assert!(!t.cfg().pid_file.exists());
}

#[test]
fn corrupt_record_self_heals() {
    let dir = tempfile::tempdir().unwrap();
    let t = tracker(dir.path(), Arc::new(MockProcesses::new()));
    fs::write(&t.cfg().pid_file, "pid=12").unwrap();
    assert_eq!(t.check_ownership().unwrap(), Ownership::Absent);
    assert!(!t.cfg().pid_file.exists());
}

#[test]
fn conflicts_exclude_recorded_pid_and_are_not_signalled() {
    let dir = tempfile::tempdir().unwrap();
    let procs = Arc::new(MockProcesses::new());
    procs.spawn(100, "/opt/bin/engine --cfg ours.kbd");
    procs.spawn(200, "/usr/local/bin/engine --cfg theirs.kbd");
    procs.spawn(300, "vim engine");
    let t = tracker(dir.path(), procs.clone());
    t.register_started_process(100, "/opt/bin/engine --cfg ours.kbd")
        .unwrap();

    let res = t.detect_conflicts().unwrap();
    assert_eq!(res.recorded_pid, Some(100));
    assert!(res.has_conflicts());
    assert_eq!(res.conflicts.len(), 1);
    assert_eq!(res.conflicts[0].pid, 200);
    assert!(procs.signals().is_empty());
}

#[tokio::test]
async fn reclaim_orphan_escalates_and_removes_record() {
    let dir = tempfile::tempdir().unwrap();
    let procs = Arc::new(MockProcesses::new());
    procs.spawn_stubborn(4242, "/opt/bin/engine");
    let t = tracker(dir.path(), procs.clone());
    backdate(&t.cfg().pid_file, 4242, Duration::from_secs(3 * 60 * 60));

    let reclaimed = t.kill_orphaned_process().await.unwrap().unwrap();
    assert_eq!(reclaimed.pid, 4242);
    assert!(reclaimed.forced);
    assert_eq!(procs.signals(), vec![(4242, "TERM"), (4242, "KILL")]);
    assert!(!t.cfg().pid_file.exists());
}

#[tokio::test]
async fn reclaim_ignores_owned_process() {
    let dir = tempfile::tempdir().unwrap();
    let procs = Arc::new(MockProcesses::new());
    procs.spawn(4242, "/opt/bin/engine");
    let t = tracker(dir.path(), procs.clone());
    t.register_started_process(4242, "/opt/bin/engine").unwrap();

    assert_eq!(t.kill_orphaned_process().await.unwrap(), None);
    assert!(procs.signals().is_empty());
    assert!(t.cfg().pid_file.exists());
}

#[tokio::test]
async fn graceful_stop_of_owned_process() {
    let dir = tempfile::tempdir().unwrap();
    let procs = Arc::new(MockProcesses::new());
    procs.spawn(4242, "/opt/bin/engine");
    let t = tracker(dir.path(), procs.clone());
    t.register_started_process(4242, "/opt/bin/engine").unwrap();

    assert_eq!(t.stop_owned_process().await.unwrap(), Some(4242));
    assert_eq!(procs.signals(), vec![(4242, "TERM")]);
    assert_eq!(t.check_ownership().unwrap(), Ownership::Absent);
}

#[tokio::test(flavor = "multi_thread")]
async fn launched_process_is_owned_until_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = TrackerCfg::new(dir.path().join("engine.pid"), "sleep");
    cfg.term_grace = Duration::from_millis(100);
    let t = ProcessTracker::new(cfg, Arc::new(SystemProcesses));

    let mut launch = LaunchCfg::new("sleep");
    launch.args = vec!["30".into()];
    let mut engine = EngineProcess::new(launch);
    let pid = engine.start(&t).unwrap();

    assert!(engine.is_running());
    assert_eq!(t.check_ownership().unwrap(), Ownership::Owned(pid));
    assert_eq!(t.record().unwrap().unwrap().command, "sleep 30");

    assert_eq!(t.stop_owned_process().await.unwrap(), Some(pid));
    assert!(!engine.is_running());
    assert!(!t.cfg().pid_file.exists());
}

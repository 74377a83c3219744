use std::{sync::Arc, time::Duration};

use engine_control::MockControl;
use permissions::{MockProbe, PermissionStatus};
use readiness::{Confidence, OracleCfg, PermissionOracle};
use tokio::time::sleep;

fn oracle(probe: Arc<MockProbe>, control: Arc<MockControl>, ttl: Duration) -> PermissionOracle {
    let cfg = OracleCfg {
        ttl,
        ..OracleCfg::default()
    };
    PermissionOracle::new(cfg, probe, control)
}

#[tokio::test]
async fn snapshots_within_ttl_are_shared() {
    let probe = Arc::new(MockProbe::granted());
    let control = Arc::new(MockControl::reachable());
    let o = oracle(probe.clone(), control.clone(), Duration::from_secs(60));

    let first = o.current_snapshot().await;
    for _ in 0..5 {
        let again = o.current_snapshot().await;
        assert!(Arc::ptr_eq(&first, &again));
    }
    assert_eq!(probe.calls(), 2);
    assert_eq!(control.permission_calls(), 1);
    assert!(first.is_system_ready());
}

#[tokio::test]
async fn expired_snapshot_recomputes_once() {
    let probe = Arc::new(MockProbe::granted());
    let control = Arc::new(MockControl::reachable());
    let o = oracle(probe.clone(), control.clone(), Duration::from_millis(50));

    let first = o.current_snapshot().await;
    sleep(Duration::from_millis(80)).await;
    let second = o.current_snapshot().await;
    let third = o.current_snapshot().await;

    assert!(!Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&second, &third));
    assert_eq!(control.permission_calls(), 2);
}

#[tokio::test]
async fn force_refresh_is_strictly_newer() {
    let probe = Arc::new(MockProbe::granted());
    let control = Arc::new(MockControl::reachable());
    let o = oracle(probe, control.clone(), Duration::from_secs(60));

    let cached = o.current_snapshot().await;
    let fresh = o.force_refresh().await;
    assert!(fresh.timestamp > cached.timestamp);
    assert_eq!(control.permission_calls(), 2);

    let after = o.current_snapshot().await;
    assert!(Arc::ptr_eq(&fresh, &after));
}

#[tokio::test]
async fn concurrent_force_refresh_waits_for_in_flight_check() {
    let probe = Arc::new(MockProbe::granted());
    let control = Arc::new(MockControl::reachable());
    control.set_delay(Duration::from_millis(100));
    let o = Arc::new(oracle(probe, control.clone(), Duration::from_secs(60)));

    let slow = tokio::spawn({
        let o = o.clone();
        async move { o.current_snapshot().await }
    });
    sleep(Duration::from_millis(20)).await;
    control.set_permissions("denied", "granted");
    let forced = o.force_refresh().await;
    let earlier = slow.await.unwrap();

    assert!(forced.timestamp > earlier.timestamp);
    assert_eq!(forced.engine.accessibility, PermissionStatus::Denied);
}

#[tokio::test]
async fn invalidate_is_lazy() {
    let probe = Arc::new(MockProbe::granted());
    let control = Arc::new(MockControl::reachable());
    let o = oracle(probe, control.clone(), Duration::from_secs(60));

    let first = o.current_snapshot().await;
    o.invalidate_cache().await;
    assert_eq!(control.permission_calls(), 1);
    let second = o.current_snapshot().await;
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(control.permission_calls(), 2);
}

#[tokio::test]
async fn engine_report_is_mapped_case_insensitively() {
    let probe = Arc::new(MockProbe::granted());
    let control = Arc::new(MockControl::reachable());
    control.set_permissions("GRANTED", "Denied");
    let o = oracle(probe, control.clone(), Duration::from_secs(60));

    let snap = o.current_snapshot().await;
    assert_eq!(snap.engine.accessibility, PermissionStatus::Granted);
    assert_eq!(snap.engine.input_monitoring, PermissionStatus::Denied);
    assert_eq!(snap.engine.source, "engine-control");
    assert_eq!(snap.engine.confidence, Confidence::High);

    control.set_permissions("error", "maybe");
    let snap = o.force_refresh().await;
    assert!(matches!(snap.engine.accessibility, PermissionStatus::Error(_)));
    assert_eq!(snap.engine.input_monitoring, PermissionStatus::Unknown);
}

#[tokio::test]
async fn unreachable_engine_is_unknown_not_guessed() {
    let probe = Arc::new(MockProbe::granted());
    let control = Arc::new(MockControl::unreachable());
    let o = oracle(probe, control, Duration::from_secs(60));

    let snap = o.current_snapshot().await;
    assert_eq!(snap.engine.accessibility, PermissionStatus::Unknown);
    assert_eq!(snap.engine.input_monitoring, PermissionStatus::Unknown);
    assert_eq!(snap.engine.confidence, Confidence::Low);
    assert_eq!(snap.engine.source, "engine-unreachable");
    assert!(!snap.engine.is_blocking());
    assert!(snap.app.is_ready());
    assert!(!snap.is_system_ready());
}

#[tokio::test]
async fn disabled_transport_skips_engine_query() {
    let probe = Arc::new(MockProbe::granted());
    let control = Arc::new(MockControl::reachable());
    control.set_transport_enabled(false);
    let o = oracle(probe, control.clone(), Duration::from_secs(60));

    let snap = o.current_snapshot().await;
    assert_eq!(snap.engine.source, "tcp-disabled");
    assert_eq!(snap.engine.confidence, Confidence::Low);
    assert_eq!(control.permission_calls(), 0);
}

#[tokio::test]
async fn slow_engine_times_out_to_unknown() {
    let probe = Arc::new(MockProbe::granted());
    let control = Arc::new(MockControl::reachable());
    control.set_delay(Duration::from_secs(5));
    let cfg = OracleCfg {
        engine_timeout: Duration::from_millis(50),
        ..OracleCfg::default()
    };
    let o = PermissionOracle::new(cfg, probe, control);

    let snap = o.current_snapshot().await;
    assert_eq!(snap.engine.accessibility, PermissionStatus::Unknown);
    assert_eq!(snap.engine.confidence, Confidence::Low);
}

#[tokio::test]
async fn slow_platform_probe_times_out_to_unknown() {
    let probe = Arc::new(MockProbe::granted());
    probe.set_delay(Duration::from_millis(300));
    let control = Arc::new(MockControl::reachable());
    let cfg = OracleCfg {
        local_timeout: Duration::from_millis(50),
        ..OracleCfg::default()
    };
    let o = PermissionOracle::new(cfg, probe, control);

    let snap = o.current_snapshot().await;
    assert_eq!(snap.app.accessibility, PermissionStatus::Unknown);
    assert_eq!(snap.app.source, "platform-timeout");
    assert!(snap.engine.is_ready());
}

//! In-process stand-ins for the engine endpoint.

use std::{
    collections::VecDeque,
    io::{Error as IoError, ErrorKind},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::sleep;

use crate::{EngineControl, Error, Result, ServiceHealth, protocol::EnginePermissions};

/// Scriptable [`EngineControl`].
#[derive(Debug)]
pub struct MockControl {
    /// Whether the endpoint answers at all.
    reachable: AtomicBool,
    /// Whether the transport is administratively enabled.
    enabled: AtomicBool,
    /// Self-reported permission strings.
    permissions: Mutex<EnginePermissions>,
    /// Latency applied to permission queries.
    delay: Mutex<Duration>,
    /// Number of reachability probes.
    status_calls: AtomicUsize,
    /// Number of permission queries.
    permission_calls: AtomicUsize,
    /// Number of reload requests.
    reload_calls: AtomicUsize,
}

impl MockControl {
    /// Reachable endpoint reporting both permissions granted.
    pub fn reachable() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            enabled: AtomicBool::new(true),
            permissions: Mutex::new(EnginePermissions {
                accessibility: "granted".into(),
                input_monitoring: "granted".into(),
            }),
            delay: Mutex::new(Duration::ZERO),
            status_calls: AtomicUsize::new(0),
            permission_calls: AtomicUsize::new(0),
            reload_calls: AtomicUsize::new(0),
        }
    }

    /// Endpoint that refuses every call.
    pub fn unreachable() -> Self {
        let m = Self::reachable();
        m.set_reachable(false);
        m
    }

    /// Toggle reachability.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Toggle the administrative transport switch.
    pub fn set_transport_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Replace the self-reported permission strings.
    pub fn set_permissions(&self, accessibility: &str, input_monitoring: &str) {
        *self.permissions.lock() = EnginePermissions {
            accessibility: accessibility.into(),
            input_monitoring: input_monitoring.into(),
        };
    }

    /// Delay permission answers by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Reachability probes seen so far.
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Permission queries seen so far.
    pub fn permission_calls(&self) -> usize {
        self.permission_calls.load(Ordering::SeqCst)
    }

    /// Reload requests seen so far.
    pub fn reload_calls(&self) -> usize {
        self.reload_calls.load(Ordering::SeqCst)
    }

    /// Fail unless the endpoint is enabled and reachable.
    fn gate(&self) -> Result<()> {
        if !self.enabled.load(Ordering::SeqCst) {
            return Err(Error::Disabled);
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(Error::Io(IoError::from(ErrorKind::ConnectionRefused)));
        }
        Ok(())
    }
}

#[async_trait]
impl EngineControl for MockControl {
    fn transport_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn check_server_status(&self, _budget: Duration) -> bool {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.gate().is_ok()
    }

    async fn check_permissions(&self, budget: Duration) -> Result<EnginePermissions> {
        self.permission_calls.fetch_add(1, Ordering::SeqCst);
        self.gate()?;
        let delay = *self.delay.lock();
        if delay > budget {
            sleep(budget).await;
            return Err(Error::Timeout(budget));
        }
        sleep(delay).await;
        Ok(self.permissions.lock().clone())
    }

    async fn reload_config(&self, _budget: Duration) -> Result<()> {
        self.reload_calls.fetch_add(1, Ordering::SeqCst);
        self.gate()
    }

    async fn restart(&self, _budget: Duration) -> Result<bool> {
        self.gate().map(|()| true)
    }
}

/// Scriptable [`ServiceHealth`].
///
/// Each wait pops the next scripted delay (if any) before answering, which
/// lets tests make an earlier validation run slower than a later one.
#[derive(Debug)]
pub struct MockHealth {
    /// Answer returned by every wait.
    ready: AtomicBool,
    /// Per-call delays, consumed front to back.
    delays: Mutex<VecDeque<Duration>>,
    /// Number of waits started.
    calls: AtomicUsize,
}

impl MockHealth {
    /// Probe answering `ready` without delay.
    pub fn new(ready: bool) -> Self {
        Self {
            ready: AtomicBool::new(ready),
            delays: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Change the answer.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Queue a delay for the next wait.
    pub fn push_delay(&self, delay: Duration) {
        self.delays.lock().push_back(delay);
    }

    /// Waits started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceHealth for MockHealth {
    async fn wait_for_service_ready(&self, timeout: Duration) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.lock().pop_front();
        if let Some(delay) = delay {
            sleep(delay.min(timeout)).await;
        }
        self.ready.load(Ordering::SeqCst)
    }
}

//! Scriptable probe for tests.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::Duration,
};

use parking_lot::Mutex;

use crate::{PermissionProbe, PermissionStatus};

/// Probe returning fixed statuses, counting calls, optionally stalling.
#[derive(Debug)]
pub struct MockProbe {
    /// Current (accessibility, input monitoring) answers.
    state: Mutex<(PermissionStatus, PermissionStatus)>,
    /// Artificial latency applied to every query.
    delay: Mutex<Duration>,
    /// Number of queries answered.
    calls: AtomicUsize,
}

impl MockProbe {
    /// Probe answering `accessibility` and `input` until changed.
    pub fn new(accessibility: PermissionStatus, input: PermissionStatus) -> Self {
        Self {
            state: Mutex::new((accessibility, input)),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        }
    }

    /// Probe answering granted for both permissions.
    pub fn granted() -> Self {
        Self::new(PermissionStatus::Granted, PermissionStatus::Granted)
    }

    /// Replace both answers.
    pub fn set(&self, accessibility: PermissionStatus, input: PermissionStatus) {
        *self.state.lock() = (accessibility, input);
    }

    /// Stall every query by `delay` (blocking the calling thread).
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Total number of individual permission queries.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Count the call and apply any configured stall.
    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

impl PermissionProbe for MockProbe {
    fn accessibility(&self) -> PermissionStatus {
        self.tick();
        self.state.lock().0.clone()
    }

    fn input_monitoring(&self) -> PermissionStatus {
        self.tick();
        self.state.lock().1.clone()
    }
}

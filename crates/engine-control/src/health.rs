//! Readiness probe for the engine's control endpoint.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::EngineControl;

/// Budget for each individual reachability probe while waiting.
const PROBE_TIMEOUT_MS: u64 = 500;
/// First poll interval; grows linearly up to [`MAX_POLL_INTERVAL_MS`].
const INITIAL_POLL_INTERVAL_MS: u64 = 50;
/// Upper bound on the poll interval.
const MAX_POLL_INTERVAL_MS: u64 = 500;

/// Answers "is the engine service up yet?".
#[async_trait]
pub trait ServiceHealth: Send + Sync {
    /// Wait until the service answers or `timeout` elapses. Returns whether it
    /// became ready. Never errors.
    async fn wait_for_service_ready(&self, timeout: Duration) -> bool;
}

/// [`ServiceHealth`] that polls [`EngineControl::check_server_status`].
#[derive(Clone)]
pub struct ControlHealth {
    /// Client used for probing.
    control: Arc<dyn EngineControl>,
}

impl ControlHealth {
    /// Probe readiness through `control`.
    pub fn new(control: Arc<dyn EngineControl>) -> Self {
        Self { control }
    }
}

#[async_trait]
impl ServiceHealth for ControlHealth {
    async fn wait_for_service_ready(&self, timeout: Duration) -> bool {
        if !self.control.transport_enabled() {
            return false;
        }
        let start = Instant::now();
        let deadline = start + timeout;
        let mut interval = Duration::from_millis(INITIAL_POLL_INTERVAL_MS);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(waited = ?start.elapsed(), "engine not ready before deadline");
                return false;
            }
            let budget = remaining.min(Duration::from_millis(PROBE_TIMEOUT_MS));
            if self.control.check_server_status(budget).await {
                debug!(waited = ?start.elapsed(), "engine ready");
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            sleep(interval.min(remaining)).await;
            if interval < Duration::from_millis(MAX_POLL_INTERVAL_MS) {
                interval = interval.saturating_add(Duration::from_millis(INITIAL_POLL_INTERVAL_MS));
            }
        }
    }
}

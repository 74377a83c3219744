//! A single cancellable delayed task.

use std::{future::Future, time::Duration};

use parking_lot::Mutex;
use tokio::{task::JoinHandle, time};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// A scheduled task.
struct Pending {
    /// Cancels the task before it fires.
    token: CancellationToken,
    /// The spawned task.
    handle: JoinHandle<()>,
}

/// Holds at most one pending delayed task. Scheduling a new one cancels the
/// previous one.
pub struct FollowUp {
    /// Name used in trace output.
    name: &'static str,
    /// The current task, if any.
    pending: Mutex<Option<Pending>>,
}

impl FollowUp {
    /// An empty slot.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            pending: Mutex::new(None),
        }
    }

    /// Run `fut` after `delay` unless cancelled or replaced first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, delay: Duration, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let name = self.name;
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    trace!(followup = name, "cancelled before firing");
                    return;
                }
            }
            trace!(followup = name, "firing");
            fut.await;
        });
        let prev = self.pending.lock().replace(Pending { token, handle });
        if let Some(prev) = prev {
            prev.token.cancel();
        }
        trace!(followup = name, delay_ms = delay.as_millis() as u64, "scheduled");
    }

    /// Cancel the pending task if it has not fired yet.
    ///
    /// A task already past its delay is left to finish.
    pub fn cancel(&self) {
        if let Some(prev) = self.pending.lock().take() {
            prev.token.cancel();
            trace!(followup = self.name, "cancel");
        }
    }

    /// Whether a task is scheduled and has not completed.
    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|p| !p.token.is_cancelled() && !p.handle.is_finished())
    }
}

impl Drop for FollowUp {
    fn drop(&mut self) {
        self.cancel();
    }
}

//! Deterministic answer to "did we start the engine, and do we still own it?".

use std::{path::PathBuf, process, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    Result,
    record::{self, PidRecord, STALE_AFTER},
    system::{ProcessControl, ProcessInfo, matches_signature, terminate_with_grace},
};

/// Grace period between SIGTERM and SIGKILL when reclaiming.
pub const TERM_GRACE: Duration = Duration::from_millis(500);

/// Tracker configuration.
#[derive(Debug, Clone)]
pub struct TrackerCfg {
    /// Well-known PID record location.
    pub pid_file: PathBuf,
    /// Identity written into records we create.
    pub owner: String,
    /// Age after which a live record counts as orphaned.
    pub stale_after: Duration,
    /// SIGTERM→SIGKILL grace period.
    pub term_grace: Duration,
    /// Executable file name identifying engine processes.
    pub signature: String,
}

impl TrackerCfg {
    /// Configuration with default timings.
    pub fn new(pid_file: impl Into<PathBuf>, signature: impl Into<String>) -> Self {
        Self {
            pid_file: pid_file.into(),
            owner: format!("keygate/{}", process::id()),
            stale_after: STALE_AFTER,
            term_grace: TERM_GRACE,
            signature: signature.into(),
        }
    }
}

/// Result of an ownership check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// No record, or the recorded process is gone.
    Absent,
    /// We launched the live process `pid` recently enough to trust the record.
    Owned(u32),
    /// `pid` is alive but its record outlived the staleness window.
    Orphaned(u32),
}

impl Ownership {
    /// Whether we own the running engine.
    pub fn is_owned(self) -> bool {
        matches!(self, Self::Owned(_))
    }

    /// The live pid named by the record, owned or not.
    pub fn pid(self) -> Option<u32> {
        match self {
            Self::Absent => None,
            Self::Owned(pid) | Self::Orphaned(pid) => Some(pid),
        }
    }

    /// `(owned, pid)` pair as consumed by status displays.
    pub fn as_pair(self) -> (bool, Option<u32>) {
        (self.is_owned(), self.pid())
    }
}

/// Engine processes we did not launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictResolution {
    /// The pid named by our record, if any; excluded from `conflicts`.
    pub recorded_pid: Option<u32>,
    /// Externally started engine instances.
    pub conflicts: Vec<ProcessInfo>,
}

impl ConflictResolution {
    /// Whether any external instance is running.
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// What a reclamation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reclaimed {
    /// The orphaned process.
    pub pid: u32,
    /// Whether SIGKILL was required.
    pub forced: bool,
}

/// Owns the PID record. Record mutations are serialized through an internal
/// lock; the record file itself is only ever replaced by atomic rename.
pub struct ProcessTracker {
    /// Paths, identity and timings.
    cfg: TrackerCfg,
    /// OS process primitives.
    procs: Arc<dyn ProcessControl>,
    /// Serializes read-modify-delete sequences on the record.
    lock: Mutex<()>,
}

impl ProcessTracker {
    /// Create a tracker using `procs` for liveness and signalling.
    pub fn new(cfg: TrackerCfg, procs: Arc<dyn ProcessControl>) -> Self {
        Self {
            cfg,
            procs,
            lock: Mutex::new(()),
        }
    }

    /// Tracker configuration.
    pub fn cfg(&self) -> &TrackerCfg {
        &self.cfg
    }

    /// Current record, if a readable one exists.
    pub fn record(&self) -> Result<Option<PidRecord>> {
        let _guard = self.lock.lock();
        record::load(&self.cfg.pid_file)
    }

    /// Persist ownership of a process we just launched.
    pub fn register_started_process(&self, pid: u32, command: &str) -> Result<PidRecord> {
        let _guard = self.lock.lock();
        let rec = PidRecord::new(pid, command, self.cfg.owner.clone());
        record::store(&self.cfg.pid_file, &rec)?;
        info!(pid, command, "registered engine process");
        Ok(rec)
    }

    /// Drop ownership of a process we deliberately stopped.
    pub fn unregister_process(&self) -> Result<()> {
        let _guard = self.lock.lock();
        if record::remove(&self.cfg.pid_file)? {
            debug!("PID record removed");
        }
        Ok(())
    }

    /// Classify the recorded process.
    ///
    /// A dead pid removes the record. A live but stale record is reported as
    /// orphaned and left on disk for explicit reclamation.
    pub fn check_ownership(&self) -> Result<Ownership> {
        let _guard = self.lock.lock();
        let Some(rec) = record::load(&self.cfg.pid_file)? else {
            return Ok(Ownership::Absent);
        };
        if !self.procs.is_alive(rec.pid) {
            debug!(pid = rec.pid, "recorded engine is gone; clearing record");
            record::remove(&self.cfg.pid_file)?;
            return Ok(Ownership::Absent);
        }
        if rec.is_stale(self.cfg.stale_after) {
            warn!(pid = rec.pid, age = ?rec.age(), "engine record is stale; treating as orphaned");
            return Ok(Ownership::Orphaned(rec.pid));
        }
        Ok(Ownership::Owned(rec.pid))
    }

    /// Find engine processes other than the one our record names.
    ///
    /// Conflicts are reported only; nothing is signalled.
    pub fn detect_conflicts(&self) -> Result<ConflictResolution> {
        let recorded_pid = self.record()?.map(|r| r.pid);
        let me = process::id();
        let conflicts: Vec<ProcessInfo> = self
            .procs
            .list()
            .into_iter()
            .filter(|p| p.pid != me && Some(p.pid) != recorded_pid)
            .filter(|p| matches_signature(&p.command, &self.cfg.signature))
            .collect();
        if !conflicts.is_empty() {
            let pids: Vec<u32> = conflicts.iter().map(|p| p.pid).collect();
            warn!(?pids, "externally started engine instances detected");
        }
        Ok(ConflictResolution {
            recorded_pid,
            conflicts,
        })
    }

    /// Terminate an orphaned engine and remove its record.
    ///
    /// Returns `None` when nothing is orphaned. The record is removed whether
    /// or not signalling succeeded.
    pub async fn kill_orphaned_process(&self) -> Result<Option<Reclaimed>> {
        let Ownership::Orphaned(pid) = self.check_ownership()? else {
            return Ok(None);
        };
        info!(pid, "reclaiming orphaned engine");
        let outcome = terminate_with_grace(self.procs.as_ref(), pid, self.cfg.term_grace).await;
        self.unregister_process()?;
        let forced = outcome?;
        Ok(Some(Reclaimed { pid, forced }))
    }

    /// Stop the engine we own and drop the record.
    ///
    /// Returns the stopped pid, or `None` if we own nothing.
    pub async fn stop_owned_process(&self) -> Result<Option<u32>> {
        let Ownership::Owned(pid) = self.check_ownership()? else {
            return Ok(None);
        };
        info!(pid, "stopping owned engine");
        let outcome = terminate_with_grace(self.procs.as_ref(), pid, self.cfg.term_grace).await;
        self.unregister_process()?;
        outcome?;
        Ok(Some(pid))
    }
}

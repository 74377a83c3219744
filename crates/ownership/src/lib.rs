//! Ownership tracking for the remapping engine process.
//!
//! Ownership is decided from a PID record we write ourselves when launching
//! the engine, never by parsing process listings. The record lives at a fixed
//! path and moves through these states:
//!
//! - absent: no record, or the recorded pid died (the record is then deleted)
//! - owned: record present, pid alive, record younger than one hour
//! - orphaned: record present, pid alive, record older than one hour; kept
//!   until [`ProcessTracker::kill_orphaned_process`] or natural death
//!
//! Process enumeration is used only to surface *other* engine instances
//! ([`ProcessTracker::detect_conflicts`]), which are reported and never
//! signalled.
#![warn(missing_docs)]

mod error;
mod launch;
pub mod record;
mod system;
mod tracker;

#[cfg(any(test, feature = "test-utils"))]
mod mock;

pub use error::{Error, Result};
pub use launch::{EngineProcess, LaunchCfg};
#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockProcesses;
pub use record::{PidRecord, STALE_AFTER};
pub use system::{
    ProcessControl, ProcessInfo, SystemProcesses, matches_signature, terminate_with_grace,
};
pub use tracker::{ConflictResolution, Ownership, ProcessTracker, Reclaimed, TERM_GRACE, TrackerCfg};

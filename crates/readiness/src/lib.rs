//! Readiness coordination for the remapping engine.
//!
//! Answers one question for the rest of keygate: can remapping safely run?
//!
//! - [`PermissionOracle`] produces cached, immutable [`PermissionSnapshot`]s
//!   covering this application and the engine, each from its authoritative
//!   source.
//! - [`Orchestrator`] runs cancellable, throttled validation runs that merge
//!   permissions, engine reachability, process ownership and installation
//!   checks into a flat issue list and a coarse [`ValidationState`].
//!
//! Only the newest run ever publishes. Start-up noise while the engine comes
//! up is held at [`ValidationState::Checking`] for a bounded window.
#![warn(missing_docs)]

mod environment;
mod followup;
mod issues;
mod oracle;
mod orchestrator;
mod snapshot;

pub use environment::{EnvironmentProbe, StaticEnvironment, SystemEnvironment};
pub use followup::FollowUp;
pub use issues::{
    Issue, IssueCategory, Severity, ValidationState, blocking_count, conflict_issues,
    only_startup_blockers, ownership_issues, permission_issues, reduce,
};
pub use oracle::{ENGINE_TIMEOUT, LOCAL_TIMEOUT, OracleCfg, PermissionOracle, SNAPSHOT_TTL};
pub use orchestrator::{
    EngineStatus, Orchestrator, OrchestratorCfg, READINESS_TIMEOUT, RunOutcome, THROTTLE,
    ValidationReport, WARMUP_FOLLOWUP, WARMUP_WINDOW,
};
pub use snapshot::{Confidence, PermissionSet, PermissionSnapshot, Subject};

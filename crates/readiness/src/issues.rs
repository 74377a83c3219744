//! Typed issues and their reduction to a coarse validation state.

use std::fmt;

use ownership::{ConflictResolution, Ownership};
use permissions::PermissionStatus;
use serde::Serialize;

use crate::snapshot::{Confidence, PermissionSnapshot};

/// What area an issue concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    /// A subject lacks a permission.
    Permissions,
    /// Something is missing from disk.
    Installation,
    /// The platform cannot support the feature.
    SystemRequirements,
    /// The engine service is not running.
    BackgroundServices,
    /// The engine process or its control endpoint misbehaves.
    Daemon,
    /// Another engine instance is running. Never blocking.
    Conflicts,
}

impl IssueCategory {
    /// Categories whose problems are expected while the engine starts up.
    pub fn is_startup_transient(self) -> bool {
        matches!(
            self,
            Self::BackgroundServices | Self::Daemon | Self::SystemRequirements
        )
    }
}

/// How bad an issue is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Remapping cannot work.
    Critical,
    /// Remapping will likely not work.
    Error,
    /// Worth knowing; does not stop anything.
    Warning,
}

/// One problem found by a validation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    /// Area.
    pub category: IssueCategory,
    /// Severity.
    pub severity: Severity,
    /// Short summary.
    pub title: String,
    /// Longer explanation or identifying detail.
    pub detail: String,
}

impl Issue {
    /// Construct an issue.
    pub fn new(
        category: IssueCategory,
        severity: Severity,
        title: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            category,
            severity,
            title: title.into(),
            detail: detail.into(),
        }
    }

    /// Conflicts never block; everything else blocks at critical or error.
    pub fn is_blocking(&self) -> bool {
        self.category != IssueCategory::Conflicts
            && matches!(self.severity, Severity::Critical | Severity::Error)
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}/{:?}] {}", self.category, self.severity, self.title)?;
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

/// Coarse outcome of the last published run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ValidationState {
    /// No result yet, or holding during warm-up.
    Checking,
    /// Remapping can run.
    Success,
    /// Something blocks remapping.
    Failed {
        /// Number of blocking issues.
        blocking: usize,
        /// Number of issues overall.
        total: usize,
    },
}

impl ValidationState {
    /// Whether this is `Failed`.
    pub fn is_failed(self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Number of blocking issues.
pub fn blocking_count(issues: &[Issue]) -> usize {
    issues.iter().filter(|i| i.is_blocking()).count()
}

/// Reduce issues to a state: success iff nothing blocks and either the engine
/// is confirmed running or there are no issues at all.
pub fn reduce(issues: &[Issue], engine_running: bool) -> ValidationState {
    let blocking = blocking_count(issues);
    if blocking == 0 && (engine_running || issues.is_empty()) {
        ValidationState::Success
    } else {
        ValidationState::Failed {
            blocking,
            total: issues.len(),
        }
    }
}

/// Whether every blocking issue is one expected during engine start-up.
pub fn only_startup_blockers(issues: &[Issue]) -> bool {
    issues
        .iter()
        .filter(|i| i.is_blocking())
        .all(|i| i.category.is_startup_transient())
}

/// Issues for denied, errored or unverifiable permissions, app first.
pub fn permission_issues(snapshot: &PermissionSnapshot) -> Vec<Issue> {
    let mut out = Vec::new();
    for (subject, set) in snapshot.subjects() {
        for (name, status) in [
            ("Accessibility", &set.accessibility),
            ("Input Monitoring", &set.input_monitoring),
        ] {
            let issue = match status {
                PermissionStatus::Granted => continue,
                PermissionStatus::Denied => Issue::new(
                    IssueCategory::Permissions,
                    Severity::Critical,
                    format!("{name} not granted to {subject}"),
                    "Grant it in System Settings > Privacy & Security",
                ),
                PermissionStatus::Error(detail) => Issue::new(
                    IssueCategory::Permissions,
                    Severity::Error,
                    format!("Could not check {name} for {subject}"),
                    detail.clone(),
                ),
                PermissionStatus::Unknown => Issue::new(
                    IssueCategory::Permissions,
                    Severity::Warning,
                    format!("{name} for {subject} is unverified"),
                    match set.confidence {
                        Confidence::Low => format!("source unavailable ({})", set.source),
                        Confidence::High => format!("{} gave no answer", set.source),
                    },
                ),
            };
            out.push(issue);
        }
    }
    out
}

/// One issue per externally started engine instance.
pub fn conflict_issues(res: &ConflictResolution) -> Vec<Issue> {
    res.conflicts
        .iter()
        .map(|p| {
            Issue::new(
                IssueCategory::Conflicts,
                Severity::Error,
                format!("Another engine instance is running (pid {})", p.pid),
                p.command.clone(),
            )
        })
        .collect()
}

/// Issues implied by the ownership record.
pub fn ownership_issues(ownership: Ownership) -> Vec<Issue> {
    match ownership {
        Ownership::Orphaned(pid) => vec![Issue::new(
            IssueCategory::Daemon,
            Severity::Warning,
            format!("Engine process {pid} looks orphaned"),
            "Its ownership record is over an hour old; reclaim it to restart cleanly",
        )],
        Ownership::Absent | Ownership::Owned(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(category: IssueCategory, severity: Severity) -> Issue {
        Issue::new(category, severity, "t", "")
    }

    #[test]
    fn conflicts_never_block() {
        let issues = vec![
            issue(IssueCategory::Conflicts, Severity::Critical),
            issue(IssueCategory::Conflicts, Severity::Error),
        ];
        assert_eq!(blocking_count(&issues), 0);
        assert_eq!(reduce(&issues, true), ValidationState::Success);
    }

    #[test]
    fn warnings_alone_need_a_running_engine() {
        let issues = vec![issue(IssueCategory::Permissions, Severity::Warning)];
        assert_eq!(reduce(&issues, true), ValidationState::Success);
        assert_eq!(
            reduce(&issues, false),
            ValidationState::Failed {
                blocking: 0,
                total: 1
            }
        );
        assert_eq!(reduce(&[], false), ValidationState::Success);
    }

    #[test]
    fn errors_block() {
        let issues = vec![
            issue(IssueCategory::Installation, Severity::Critical),
            issue(IssueCategory::Daemon, Severity::Error),
            issue(IssueCategory::Conflicts, Severity::Error),
        ];
        assert_eq!(
            reduce(&issues, true),
            ValidationState::Failed {
                blocking: 2,
                total: 3
            }
        );
        assert!(!only_startup_blockers(&issues));
        assert!(only_startup_blockers(&issues[1..]));
    }
}

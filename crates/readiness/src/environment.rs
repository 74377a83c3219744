//! Installation and platform checks that do not depend on the engine.

use std::{fs, path::PathBuf};

use crate::issues::{Issue, IssueCategory, Severity};

/// Source of installation and system-requirement issues.
pub trait EnvironmentProbe: Send + Sync {
    /// Current issues. Called once per validation run on a blocking thread.
    fn issues(&self) -> Vec<Issue>;
}

/// Checks the real filesystem and platform.
#[derive(Debug, Clone, Default)]
pub struct SystemEnvironment {
    /// Engine executable to verify, if one is configured.
    pub engine_executable: Option<PathBuf>,
}

impl SystemEnvironment {
    /// Check `engine_executable` on each run.
    pub fn new(engine_executable: Option<PathBuf>) -> Self {
        Self { engine_executable }
    }

    /// Critical issue if the configured executable is missing or not executable.
    fn installation(&self) -> Option<Issue> {
        let path = self.engine_executable.as_ref()?;
        let missing = |detail: String| {
            Some(Issue::new(
                IssueCategory::Installation,
                Severity::Critical,
                "Remapping engine is not installed",
                detail,
            ))
        };
        let meta = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) => return missing(format!("{}: {e}", path.display())),
        };
        if !meta.is_file() {
            return missing(format!("{} is not a file", path.display()));
        }
        if !is_executable(&meta) {
            return missing(format!("{} is not executable", path.display()));
        }
        None
    }
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &fs::Metadata) -> bool {
    true
}

impl EnvironmentProbe for SystemEnvironment {
    fn issues(&self) -> Vec<Issue> {
        let mut out: Vec<Issue> = self.installation().into_iter().collect();
        if !permissions::platform_supported() {
            out.push(Issue::new(
                IssueCategory::SystemRequirements,
                Severity::Warning,
                "Permission checks are unavailable on this platform",
                "Accessibility and Input Monitoring cannot be verified",
            ));
        }
        out
    }
}

/// A fixed list of issues.
#[derive(Debug, Clone, Default)]
pub struct StaticEnvironment(pub Vec<Issue>);

impl EnvironmentProbe for StaticEnvironment {
    fn issues(&self) -> Vec<Issue> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn installation_issues(env: &SystemEnvironment) -> Vec<Issue> {
        env.issues()
            .into_iter()
            .filter(|i| i.category == IssueCategory::Installation)
            .collect()
    }

    #[test]
    fn missing_executable_is_critical() {
        let dir = tempfile::tempdir().unwrap();
        let env = SystemEnvironment::new(Some(dir.path().join("engine")));
        let issues = installation_issues(&env);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Critical);
        assert!(issues[0].is_blocking());
    }

    #[test]
    fn executable_bit_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine");
        fs::write(&path, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        let env = SystemEnvironment::new(Some(path.clone()));
        assert_eq!(installation_issues(&env).len(), 1);

        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(installation_issues(&env).is_empty());
    }

    #[test]
    fn unconfigured_executable_is_not_checked() {
        assert!(installation_issues(&SystemEnvironment::default()).is_empty());
    }
}

//! Immutable permission observations.

use std::{fmt, time::Instant};

use permissions::PermissionStatus;
use serde::Serialize;

/// The two parties whose permissions matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    /// This application.
    App,
    /// The remapping engine process.
    Engine,
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::App => f.write_str("keygate"),
            Self::Engine => f.write_str("remapping engine"),
        }
    }
}

/// How much a [`PermissionSet`] can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Came from an authoritative source that answered.
    High,
    /// The authoritative source was unavailable.
    Low,
}

/// One subject's permissions as observed from one source at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionSet {
    /// Accessibility permission.
    pub accessibility: PermissionStatus,
    /// Input Monitoring permission.
    pub input_monitoring: PermissionStatus,
    /// Where the answer came from, e.g. `"platform"` or `"engine-control"`.
    pub source: &'static str,
    /// Trust in the answer.
    pub confidence: Confidence,
    /// Observation time.
    pub timestamp: Instant,
}

impl PermissionSet {
    /// A set observed now.
    pub fn new(
        accessibility: PermissionStatus,
        input_monitoring: PermissionStatus,
        source: &'static str,
        confidence: Confidence,
    ) -> Self {
        Self {
            accessibility,
            input_monitoring,
            source,
            confidence,
            timestamp: Instant::now(),
        }
    }

    /// Both permissions unknown, low confidence.
    pub fn unknown(source: &'static str) -> Self {
        Self::new(
            PermissionStatus::Unknown,
            PermissionStatus::Unknown,
            source,
            Confidence::Low,
        )
    }

    /// Both permissions granted.
    pub fn is_ready(&self) -> bool {
        self.accessibility.is_ready() && self.input_monitoring.is_ready()
    }

    /// Either permission denied or errored.
    pub fn is_blocking(&self) -> bool {
        self.accessibility.is_blocking() || self.input_monitoring.is_blocking()
    }
}

/// Permission state of both subjects. Never mutated after construction;
/// freshness is the oracle's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionSnapshot {
    /// This application's permissions.
    pub app: PermissionSet,
    /// The engine's permissions.
    pub engine: PermissionSet,
    /// When the snapshot was assembled.
    pub timestamp: Instant,
}

impl PermissionSnapshot {
    /// Combine the two subjects' sets.
    pub fn new(app: PermissionSet, engine: PermissionSet, timestamp: Instant) -> Self {
        Self {
            app,
            engine,
            timestamp,
        }
    }

    /// The set for `subject`.
    pub fn get(&self, subject: Subject) -> &PermissionSet {
        match subject {
            Subject::App => &self.app,
            Subject::Engine => &self.engine,
        }
    }

    /// Iterate subjects with their sets.
    pub fn subjects(&self) -> impl Iterator<Item = (Subject, &PermissionSet)> {
        [(Subject::App, &self.app), (Subject::Engine, &self.engine)].into_iter()
    }

    /// Both subjects fully granted.
    pub fn is_system_ready(&self) -> bool {
        self.app.is_ready() && self.engine.is_ready()
    }
}

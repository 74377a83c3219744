//! Silent permission checks for the keygate coordination layer.
//!
//! This crate exposes a minimal, stable API to query whether the current
//! process holds the Accessibility and Input Monitoring permissions. On macOS
//! it calls the preflight variants of the respective framework functions, which
//! never display a system prompt. Prompting is the host's job.
//!
//! Notes
//! - [`PermissionStatus`] is the tri-state (plus error) vocabulary shared by
//!   every subject: this application and the remapping engine.
//! - [`PermissionProbe`] is the seam consumers depend on. [`SystemProbe`] is
//!   the real implementation; tests use [`MockProbe`] (feature `test-utils`).
//! - On platforms without these primitives every check reports
//!   [`PermissionStatus::Unknown`] and [`platform_supported`] returns `false`.

use std::fmt;

use serde::{Deserialize, Serialize};

#[cfg(any(test, feature = "test-utils"))]
mod mock;

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockProbe;

#[cfg(target_os = "macos")]
#[link(name = "ApplicationServices", kind = "framework")]
unsafe extern "C" {
    fn AXIsProcessTrusted() -> bool;
    fn CGPreflightListenEventAccess() -> bool;
}

/// Observed state of a single permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum PermissionStatus {
    /// The permission is held.
    Granted,
    /// The permission is explicitly not held.
    Denied,
    /// The check itself failed.
    Error(String),
    /// No trustworthy answer is available.
    Unknown,
}

impl PermissionStatus {
    /// True only for [`PermissionStatus::Granted`].
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Granted)
    }

    /// True for denied or errored checks. `Unknown` is neither
    /// ready nor blocking.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Denied | Self::Error(_))
    }

    /// Map a self-reported status string. Matching is case-insensitive and
    /// anything unrecognized is `Unknown`.
    pub fn from_reported(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "granted" => Self::Granted,
            "denied" => Self::Denied,
            "error" => Self::Error(format!("reported error: {value}")),
            _ => Self::Unknown,
        }
    }

    /// Convert a platform boolean into a status.
    pub fn from_bool(ok: bool) -> Self {
        if ok { Self::Granted } else { Self::Denied }
    }
}

impl fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Granted => f.write_str("granted"),
            Self::Denied => f.write_str("denied"),
            Self::Error(detail) => write!(f, "error ({detail})"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// Non-prompting permission queries for the current process.
///
/// Implementations must be cheap and side-effect free. Callers may invoke
/// them from a blocking thread with a timeout.
pub trait PermissionProbe: Send + Sync {
    /// Accessibility (AX) permission for this process.
    fn accessibility(&self) -> PermissionStatus;
    /// Input Monitoring (keyboard event listening) permission for this process.
    fn input_monitoring(&self) -> PermissionStatus;
}

/// Probe backed by the platform preflight APIs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl PermissionProbe for SystemProbe {
    fn accessibility(&self) -> PermissionStatus {
        if platform_supported() {
            PermissionStatus::from_bool(accessibility_ok())
        } else {
            PermissionStatus::Unknown
        }
    }

    fn input_monitoring(&self) -> PermissionStatus {
        if platform_supported() {
            PermissionStatus::from_bool(input_monitoring_ok())
        } else {
            PermissionStatus::Unknown
        }
    }
}

/// Whether this platform exposes the permission primitives at all.
pub const fn platform_supported() -> bool {
    cfg!(target_os = "macos")
}

/// Check the global Accessibility permission.
#[cfg(target_os = "macos")]
pub fn accessibility_ok() -> bool {
    unsafe { AXIsProcessTrusted() }
}

/// Check if the application has the "Input Monitoring" permission.
///
/// Returns `true` when the process is allowed to listen for keyboard events
/// (CGEvent tap), and `false` otherwise. Uses the preflight call, so no
/// prompt is ever shown.
#[cfg(target_os = "macos")]
pub fn input_monitoring_ok() -> bool {
    unsafe { CGPreflightListenEventAccess() }
}

/// Accessibility is never granted where the platform has no such concept.
#[cfg(not(target_os = "macos"))]
pub fn accessibility_ok() -> bool {
    false
}

/// Input Monitoring is never granted where the platform has no such concept.
#[cfg(not(target_os = "macos"))]
pub fn input_monitoring_ok() -> bool {
    false
}

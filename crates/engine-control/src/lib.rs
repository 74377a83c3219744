//! Client side of the remapping engine's control protocol.
//!
//! The engine listens on a loopback TCP port and speaks newline-delimited
//! JSON (see [`protocol`]). This crate provides:
//! - [`EngineControl`]: the seam the rest of the workspace depends on.
//! - [`TcpControlClient`]: the real implementation; one connection per call,
//!   optional token authentication, every call bounded by a caller timeout.
//! - [`ServiceHealth`] / [`ControlHealth`]: bounded wait for the endpoint to
//!   come up.
//!
//! Reachability failures are ordinary values here (`false` or an error the
//! caller can classify with [`Error::is_unreachable`]); nothing in this crate
//! panics or retries forever.
#![warn(missing_docs)]

use std::time::Duration;

use async_trait::async_trait;

mod client;
mod error;
mod health;
pub mod protocol;

#[cfg(any(test, feature = "test-utils"))]
mod mock;

pub use client::{ControlCfg, DEFAULT_CONTROL_PORT, TcpControlClient, TokenProvider};
pub use error::{Error, Result};
pub use health::{ControlHealth, ServiceHealth};
#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockControl, MockHealth};
pub use protocol::EnginePermissions;

/// Operations the coordination layer needs from the engine.
#[async_trait]
pub trait EngineControl: Send + Sync {
    /// False when the transport is administratively disabled; callers should
    /// not expect any call to succeed.
    fn transport_enabled(&self) -> bool;

    /// Fast reachability probe.
    async fn check_server_status(&self, timeout: Duration) -> bool;

    /// Self-reported permission strings.
    async fn check_permissions(&self, timeout: Duration) -> Result<EnginePermissions>;

    /// Ask the engine to reload its configuration.
    async fn reload_config(&self, timeout: Duration) -> Result<()>;

    /// Ask the engine to restart. Returns whether it accepted.
    async fn restart(&self, timeout: Duration) -> Result<bool>;
}

use std::{io::Error as IoError, result::Result as StdResult, time::Duration};

use thiserror::Error;

/// Errors talking to the engine's control endpoint.
#[derive(Error, Debug)]
pub enum Error {
    /// Socket-level failure (refused, reset, closed).
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// The call did not complete within its budget.
    #[error("Control call timed out after {0:?}")]
    Timeout(Duration),

    /// The engine answered with something we did not expect.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Encoding or decoding a message failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The TCP transport is administratively disabled.
    #[error("Control transport disabled")]
    Disabled,

    /// The engine rejected our session token.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),
}

impl Error {
    /// True when the failure means "nobody answered" rather than "answered badly".
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Timeout(_) | Self::Disabled)
    }
}

/// Convenience type alias for Results using our Error type
pub type Result<T> = StdResult<T, Error>;

use std::{io::Error as IoError, result::Result as StdResult};

use thiserror::Error;

/// Errors from ownership tracking and process control.
#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem failure on the PID record.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// The PID record could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Delivering a signal failed for a reason other than "no such process".
    #[error("Failed to signal pid {pid}: errno {errno}")]
    Signal {
        /// Target process.
        pid: u32,
        /// OS error number.
        errno: i32,
    },

    /// Launching the engine failed.
    #[error("Spawn error: {0}")]
    Spawn(String),
}

/// Convenience type alias for Results using our Error type
pub type Result<T> = StdResult<T, Error>;

use std::{io::Error as IoError, result::Result as StdResult};

use thiserror::Error;

/// Errors from token storage.
#[derive(Error, Debug)]
pub enum Error {
    /// Shared token file could not be read or written.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// The secure credential store rejected an operation.
    #[error("Credential store error: {0}")]
    CredentialStore(String),

    /// Refused to store an empty token.
    #[error("Token is empty")]
    EmptyToken,
}

/// Convenience type alias for Results using our Error type
pub type Result<T> = StdResult<T, Error>;

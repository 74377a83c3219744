//! Error handling for the keygate binary.

use std::{io, path::PathBuf, result};

use thiserror::Error;

/// Convenient result type for keygate commands.
pub type Result<T> = result::Result<T, Error>;

/// Errors that abort a keygate command.
#[derive(Debug, Error)]
pub enum Error {
    /// Wrapper for standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The settings file could not be read.
    #[error("Failed to read settings {path}: {source}")]
    SettingsRead {
        /// Settings file path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// The settings file is not valid RON for our schema.
    #[error("Invalid settings {path}: {source}")]
    SettingsParse {
        /// Settings file path.
        path: PathBuf,
        /// Parser error with position.
        source: ron::error::SpannedError,
    },
    /// Token storage failed.
    #[error("Token error: {0}")]
    Token(#[from] authtoken::Error),
    /// PID record or signalling failed.
    #[error("Ownership error: {0}")]
    Ownership(#[from] ownership::Error),
    /// The engine's control endpoint failed.
    #[error("Engine control error: {0}")]
    Control(#[from] engine_control::Error),
    /// JSON output failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// A command needs an engine executable and none is configured.
    #[error("No engine executable configured; pass --engine or set engine.executable")]
    NoEngine,
}

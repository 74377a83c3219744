//! The persisted PID record and its on-disk handling.
//!
//! The record is a small JSON document written with temp-file-then-rename, so
//! concurrent readers see either the previous or the next complete record.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, ErrorKind, Write as _},
    os::unix::fs::{OpenOptionsExt as _, PermissionsExt as _},
    path::Path,
    process,
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::Result;

/// Records older than this are treated as abandoned.
pub const STALE_AFTER: Duration = Duration::from_secs(60 * 60);

/// Who launched the engine, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidRecord {
    /// Engine process id.
    pub pid: u32,
    /// Wall-clock launch time.
    pub start_time: SystemTime,
    /// Launch command line.
    pub command: String,
    /// Identity of the launching application.
    pub owner: String,
}

impl PidRecord {
    /// A record stamped with the current time.
    pub fn new(pid: u32, command: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            pid,
            start_time: SystemTime::now(),
            command: command.into(),
            owner: owner.into(),
        }
    }

    /// Time since launch. A start time in the future reads as zero.
    pub fn age(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.start_time)
            .unwrap_or_default()
    }

    /// Whether the record has outlived `threshold`.
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.age() > threshold
    }
}

/// Read the record at `path`.
///
/// A missing file is `Ok(None)`. An unreadable or undecodable file is deleted
/// and also reported as `Ok(None)`.
pub fn load(path: &Path) -> Result<Option<PidRecord>> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable PID record; removing");
            remove(path)?;
            return Ok(None);
        }
    };
    match serde_json::from_slice::<PidRecord>(&bytes) {
        Ok(rec) => Ok(Some(rec)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt PID record; removing");
            remove(path)?;
            Ok(None)
        }
    }
}

/// Atomically replace the record at `path`. The file is created 0600 and its
/// parent directory is created 0700 if missing.
pub fn store(path: &Path, record: &PidRecord) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent)?;
        fs::set_permissions(parent, fs::Permissions::from_mode(0o700))?;
    }
    let body = serde_json::to_vec_pretty(record)?;
    let tmp = path.with_extension(format!("tmp.{}", process::id()));
    let res = write_private(&tmp, &body).and_then(|()| fs::rename(&tmp, path));
    if res.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    Ok(res?)
}

/// Remove the record. Returns whether a file was actually deleted.
pub fn remove(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Write `body` to a fresh 0600 file and flush it to disk.
fn write_private(path: &Path, body: &[u8]) -> io::Result<()> {
    let mut f: File = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    f.write_all(body)?;
    f.sync_all()
}

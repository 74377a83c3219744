//! Shared token file: plain secret content, owner-only permissions.

use std::{
    fs::{self, OpenOptions},
    io::{self, ErrorKind, Write as _},
    os::unix::fs::{OpenOptionsExt as _, PermissionsExt as _},
    path::Path,
    process,
};

use tracing::warn;

use crate::Result;

/// Read the token file. Missing or empty files read as `None`; files that
/// cannot be read or decoded are deleted and read as `None`.
pub fn read_token_file(path: &Path) -> Result<Option<String>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable token file; removing");
            discard(path);
            return Ok(None);
        }
    };
    match String::from_utf8(raw) {
        Ok(text) => {
            let token = text.trim();
            Ok((!token.is_empty()).then(|| token.to_string()))
        }
        Err(_) => {
            warn!(path = %path.display(), "token file is not UTF-8; removing");
            discard(path);
            Ok(None)
        }
    }
}

/// Atomically replace the token file (temp file + rename), 0600 file in a 0700
/// directory.
pub fn write_token_file(path: &Path, token: &str) -> Result<()> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir)?;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    let tmp = path.with_extension(format!("tmp.{}", process::id()));
    let res = write_private(&tmp, token.as_bytes()).and_then(|()| fs::rename(&tmp, path));
    if res.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    Ok(res?)
}

/// Delete the token file, tolerating absence.
pub fn remove_token_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

/// Best-effort removal of a bad token file. An empty directory squatting on
/// the path is removed too.
fn discard(path: &Path) {
    let res = if path.is_dir() {
        fs::remove_dir(path)
    } else {
        fs::remove_file(path)
    };
    if let Err(e) = res
        && e.kind() != ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "could not remove bad token file");
    }
}

/// Create `path` with mode 0600 and write `body` durably.
fn write_private(path: &Path, body: &[u8]) -> io::Result<()> {
    let mut f = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // The mode above only applies on creation; tighten a leftover temp file too.
    f.set_permissions(fs::Permissions::from_mode(0o600))?;
    f.write_all(body)?;
    f.sync_all()
}

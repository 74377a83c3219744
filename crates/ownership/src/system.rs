//! Process primitives: liveness, signalling and enumeration.

use std::{fs, io::Error as IoError, path::Path, process::Command, time::Duration};

use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Poll interval while waiting for a signalled process to exit.
const TERM_POLL_INTERVAL_MS: u64 = 10;

/// A running process as seen by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Process id.
    pub pid: u32,
    /// Full command line, arguments separated by spaces.
    pub command: String,
}

/// OS process operations used by the tracker.
pub trait ProcessControl: Send + Sync {
    /// Whether `pid` names a live process.
    fn is_alive(&self, pid: u32) -> bool;
    /// Deliver SIGTERM. A process that is already gone is not an error.
    fn terminate(&self, pid: u32) -> Result<()>;
    /// Deliver SIGKILL. A process that is already gone is not an error.
    fn kill(&self, pid: u32) -> Result<()>;
    /// Enumerate running processes.
    fn list(&self) -> Vec<ProcessInfo>;
}

/// [`ProcessControl`] backed by `kill(2)` and the OS process table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcesses;

impl SystemProcesses {
    /// Send `sig` to `pid`, treating ESRCH as success.
    fn signal(pid: u32, sig: libc::c_int) -> Result<()> {
        let Ok(raw) = libc::pid_t::try_from(pid) else {
            return Err(Error::Signal {
                pid,
                errno: libc::EINVAL,
            });
        };
        // pid 0 and negative values address process groups; never do that.
        if raw <= 0 {
            return Err(Error::Signal {
                pid,
                errno: libc::EINVAL,
            });
        }
        let rc = unsafe { libc::kill(raw, sig) };
        if rc == 0 {
            return Ok(());
        }
        match IoError::last_os_error().raw_os_error() {
            Some(libc::ESRCH) => Ok(()),
            Some(errno) => Err(Error::Signal { pid, errno }),
            None => Err(Error::Signal { pid, errno: 0 }),
        }
    }
}

impl ProcessControl for SystemProcesses {
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(raw) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if raw <= 0 {
            return false;
        }
        let rc = unsafe { libc::kill(raw, 0) };
        // kill(0) returns 0 if the process exists and we have permission,
        // -1 with EPERM if it exists but we lack permission, and -1 with ESRCH if not.
        rc == 0 || IoError::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        Self::signal(pid, libc::SIGTERM)
    }

    fn kill(&self, pid: u32) -> Result<()> {
        Self::signal(pid, libc::SIGKILL)
    }

    fn list(&self) -> Vec<ProcessInfo> {
        let proc_root = Path::new("/proc");
        if proc_root.join("self/cmdline").exists() {
            list_procfs(proc_root)
        } else {
            list_ps()
        }
    }
}

/// Enumerate processes from a procfs mount.
fn list_procfs(root: &Path) -> Vec<ProcessInfo> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        // Processes can vanish between readdir and read; skip them.
        let Ok(raw) = fs::read(entry.path().join("cmdline")) else {
            continue;
        };
        let command = raw
            .split(|b| *b == 0)
            .filter(|part| !part.is_empty())
            .map(|part| String::from_utf8_lossy(part).into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        if !command.is_empty() {
            out.push(ProcessInfo { pid, command });
        }
    }
    out
}

/// Enumerate processes with `ps` where there is no procfs.
fn list_ps() -> Vec<ProcessInfo> {
    let output = match Command::new("ps").args(["-axo", "pid=,command="]).output() {
        Ok(o) if o.status.success() => o,
        Ok(o) => {
            warn!(status = ?o.status, "ps exited unsuccessfully");
            return Vec::new();
        }
        Err(e) => {
            warn!(error = %e, "failed to run ps");
            return Vec::new();
        }
    };
    parse_ps(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `pid command...` lines.
fn parse_ps(text: &str) -> Vec<ProcessInfo> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim_start();
            let (pid, command) = line.split_once(char::is_whitespace)?;
            Some(ProcessInfo {
                pid: pid.parse().ok()?,
                command: command.trim().to_string(),
            })
        })
        .collect()
}

/// Whether `command` launches the executable named `signature`.
///
/// Compares the file name of the first argument, so `/opt/bin/engine --cfg x`
/// matches `engine` but `vim engine.cfg` does not.
pub fn matches_signature(command: &str, signature: &str) -> bool {
    let Some(program) = command.split_whitespace().next() else {
        return false;
    };
    Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n == signature)
}

/// Gracefully stop `pid`: SIGTERM, wait up to `grace`, then SIGKILL.
///
/// Returns `true` when escalation to SIGKILL was needed.
pub async fn terminate_with_grace(
    procs: &dyn ProcessControl,
    pid: u32,
    grace: Duration,
) -> Result<bool> {
    procs.terminate(pid)?;
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !procs.is_alive(pid) {
            info!(pid, "process exited gracefully");
            return Ok(false);
        }
        sleep(Duration::from_millis(TERM_POLL_INTERVAL_MS)).await;
    }
    if !procs.is_alive(pid) {
        return Ok(false);
    }
    warn!(pid, "graceful stop timed out; escalating to SIGKILL");
    procs.kill(pid)?;
    debug!(pid, "SIGKILL delivered");
    Ok(true)
}

//! Fake process table for tests.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;

use crate::{ProcessControl, ProcessInfo, Result};

/// In-memory process table. Processes listed in `stubborn` ignore SIGTERM.
#[derive(Debug, Default)]
pub struct MockProcesses {
    /// Live processes by pid.
    table: Mutex<BTreeMap<u32, String>>,
    /// Pids that survive SIGTERM.
    stubborn: Mutex<BTreeSet<u32>>,
    /// Signals delivered, in order.
    signals: Mutex<Vec<(u32, &'static str)>>,
}

impl MockProcesses {
    /// Empty process table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a live process.
    pub fn spawn(&self, pid: u32, command: &str) {
        self.table.lock().insert(pid, command.to_string());
    }

    /// Add a live process that ignores SIGTERM.
    pub fn spawn_stubborn(&self, pid: u32, command: &str) {
        self.spawn(pid, command);
        self.stubborn.lock().insert(pid);
    }

    /// Remove a process as if it exited.
    pub fn exit(&self, pid: u32) {
        self.table.lock().remove(&pid);
    }

    /// Signals delivered so far.
    pub fn signals(&self) -> Vec<(u32, &'static str)> {
        self.signals.lock().clone()
    }
}

impl ProcessControl for MockProcesses {
    fn is_alive(&self, pid: u32) -> bool {
        self.table.lock().contains_key(&pid)
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        self.signals.lock().push((pid, "TERM"));
        if !self.stubborn.lock().contains(&pid) {
            self.exit(pid);
        }
        Ok(())
    }

    fn kill(&self, pid: u32) -> Result<()> {
        self.signals.lock().push((pid, "KILL"));
        self.exit(pid);
        Ok(())
    }

    fn list(&self) -> Vec<ProcessInfo> {
        self.table
            .lock()
            .iter()
            .map(|(pid, command)| ProcessInfo {
                pid: *pid,
                command: command.clone(),
            })
            .collect()
    }
}

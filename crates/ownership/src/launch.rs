use std::{
    path::PathBuf,
    process::{Child, Command, Stdio},
};

use tracing::{debug, info, warn};

use crate::{Error, ProcessTracker, Result};

/// Configuration for launching the engine process
#[derive(Debug, Clone)]
pub struct LaunchCfg {
    /// Path to the executable
    pub executable: PathBuf,
    /// Arguments to pass to the engine
    pub args: Vec<String>,
    /// Environment variables to set
    pub env: Vec<(String, String)>,
    /// Whether to inherit the parent's environment
    pub inherit_env: bool,
}

impl LaunchCfg {
    /// Create a new launch configuration with the given executable
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            env: Vec::new(),
            inherit_env: true,
        }
    }

    /// Command line as recorded in the PID record.
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.executable.to_string_lossy().into_owned()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// An engine process launched and registered by us.
///
/// Dropping a running `EngineProcess` kills it; call [`detach`](Self::detach)
/// to leave it running under the PID record alone. Stopping goes through
/// [`ProcessTracker::stop_owned_process`].
pub struct EngineProcess {
    /// The spawned child, while we still hold it.
    child: Option<Child>,
    /// How the engine was launched.
    cfg: LaunchCfg,
}

impl EngineProcess {
    /// Create an unstarted engine handle.
    pub fn new(cfg: LaunchCfg) -> Self {
        Self { child: None, cfg }
    }

    /// Spawn the engine and record ownership with `tracker`.
    pub fn start(&mut self, tracker: &ProcessTracker) -> Result<u32> {
        if self.is_running() {
            return Err(Error::Spawn("engine is already running".to_string()));
        }

        info!("Starting engine process: {:?}", self.cfg.executable);
        debug!("Engine args: {:?}", self.cfg.args);

        let mut command = Command::new(&self.cfg.executable);
        command.args(&self.cfg.args).stdin(Stdio::null());
        if !self.cfg.inherit_env {
            command.env_clear();
        }
        for (key, value) in &self.cfg.env {
            command.env(key, value);
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::Spawn(format!("{}: {e}", self.cfg.executable.display())))?;
        let pid = child.id();
        info!(pid, "Engine process spawned");

        if let Err(e) = tracker.register_started_process(pid, &self.cfg.command_line()) {
            warn!(pid, error = %e, "failed to record engine ownership; stopping it");
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }
        self.child = Some(child);
        Ok(pid)
    }

    /// Check if the engine process is running
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            // Reap without blocking so an exited child reads as stopped.
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Release the child without stopping it, returning its pid.
    pub fn detach(mut self) -> Option<u32> {
        self.child.take().map(|c| c.id())
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take()
            && matches!(child.try_wait(), Ok(None))
        {
            debug!("EngineProcess dropped while still running, killing it");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

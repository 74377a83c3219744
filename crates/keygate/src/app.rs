//! Wiring of the coordination components from settings.

use std::{path::PathBuf, sync::Arc};

#[cfg(target_os = "macos")]
use authtoken::KeychainStore;
#[cfg(not(target_os = "macos"))]
use authtoken::MemoryStore;
use authtoken::{CredentialStore, TokenManager};
use engine_control::{ControlHealth, EngineControl, TcpControlClient};
use ownership::{ProcessTracker, SystemProcesses};
use permissions::SystemProbe;
use readiness::{Orchestrator, PermissionOracle, SystemEnvironment};
use tracing::debug;

use crate::{
    error::Result,
    settings::{Settings, ensure_private_dir, runtime_dir},
};

/// Every component a command may need, built once per invocation.
pub struct App {
    /// Effective settings.
    pub settings: Settings,
    /// Session token manager.
    pub tokens: Arc<TokenManager>,
    /// Engine control client.
    pub control: Arc<dyn EngineControl>,
    /// Engine ownership tracker.
    pub tracker: Arc<ProcessTracker>,
    /// Permission oracle.
    pub oracle: Arc<PermissionOracle>,
    /// Readiness orchestrator, configured with a control-endpoint health probe.
    pub orchestrator: Orchestrator,
}

/// Platform credential store: the keychain.
#[cfg(target_os = "macos")]
fn credential_store(settings: &Settings) -> Arc<dyn CredentialStore> {
    Arc::new(KeychainStore::new(settings.keychain_service()))
}

/// No keychain here; the shared file is the only persistent copy.
#[cfg(not(target_os = "macos"))]
fn credential_store(_settings: &Settings) -> Arc<dyn CredentialStore> {
    Arc::new(MemoryStore::new())
}

impl App {
    /// Build components over the real platform, processes and network.
    pub fn build(settings: Settings) -> Result<Self> {
        let runtime: PathBuf = runtime_dir();
        ensure_private_dir(&runtime)?;
        debug!(runtime = %runtime.display(), "runtime directory ready");

        let tokens = Arc::new(TokenManager::new(
            settings.token_cfg(&runtime),
            credential_store(&settings),
        ));
        let provider = tokens.clone();
        let control: Arc<dyn EngineControl> = Arc::new(
            TcpControlClient::new(settings.control_cfg())
                .with_token_provider(move || provider.current_token().ok().flatten()),
        );
        let tracker = Arc::new(ProcessTracker::new(
            settings.tracker_cfg(&runtime),
            Arc::new(SystemProcesses),
        ));
        let oracle = Arc::new(PermissionOracle::new(
            settings.oracle_cfg(),
            Arc::new(SystemProbe),
            control.clone(),
        ));
        let orchestrator = Orchestrator::new(
            settings.orchestrator_cfg(),
            oracle.clone(),
            tracker.clone(),
            Arc::new(SystemEnvironment::new(settings.engine.executable.clone())),
        );
        orchestrator.configure(Arc::new(ControlHealth::new(control.clone())));

        Ok(Self {
            settings,
            tokens,
            control,
            tracker,
            oracle,
            orchestrator,
        })
    }
}

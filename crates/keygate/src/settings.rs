//! RON settings file and the per-user runtime directory.
//!
//! Every field is optional. Missing fields fall back to each component's
//! defaults, and command-line flags are applied on top afterwards.

use std::{
    env, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    process,
    time::Duration,
};

use authtoken::TokenCfg;
use engine_control::ControlCfg;
use ownership::{LaunchCfg, TrackerCfg};
use readiness::{OracleCfg, OrchestratorCfg};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Credential-store service name.
pub const KEYCHAIN_SERVICE: &str = "com.keygate.engine";
/// Credential-store account holding the session token.
pub const TOKEN_ACCOUNT: &str = "control-token";
/// Signature used when no engine executable is configured.
const DEFAULT_SIGNATURE: &str = "kanata";

/// Engine launch and identification.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    /// Executable to launch and check for.
    pub executable: Option<PathBuf>,
    /// Arguments passed at launch.
    pub args: Vec<String>,
    /// Extra environment for the engine.
    pub env: Vec<(String, String)>,
    /// Executable name used to spot other engine instances.
    pub signature: Option<String>,
}

/// Control endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControlSettings {
    /// Listener address.
    pub addr: Option<SocketAddr>,
    /// Administrative switch for the TCP transport.
    pub enabled: Option<bool>,
}

/// Permission oracle timings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OracleSettings {
    /// Snapshot cache lifetime.
    pub ttl_ms: Option<u64>,
    /// Engine permission query budget.
    pub engine_timeout_ms: Option<u64>,
    /// Platform permission query budget.
    pub local_timeout_ms: Option<u64>,
}

/// Validation timings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationSettings {
    /// Throttle window for unforced runs.
    pub throttle_ms: Option<u64>,
    /// How long a run waits for the control endpoint.
    pub readiness_timeout_ms: Option<u64>,
    /// Warm-up window after start.
    pub warmup_window_ms: Option<u64>,
    /// Follow-up delay while warming up.
    pub warmup_followup_ms: Option<u64>,
}

/// Ownership record settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OwnershipSettings {
    /// PID record path.
    pub pid_file: Option<PathBuf>,
    /// Age after which a live record counts as orphaned.
    pub stale_after_secs: Option<u64>,
    /// Grace period between SIGTERM and SIGKILL.
    pub term_grace_ms: Option<u64>,
}

/// Token storage settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TokenSettings {
    /// Shared token file path.
    pub token_file: Option<PathBuf>,
    /// Credential-store service name.
    pub service: Option<String>,
    /// Credential-store account name.
    pub account: Option<String>,
    /// In-memory cache lifetime.
    pub cache_ttl_secs: Option<u64>,
}

/// Top-level settings file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Engine launch and identification.
    pub engine: EngineSettings,
    /// Control endpoint.
    pub control: ControlSettings,
    /// Oracle timings.
    pub oracle: OracleSettings,
    /// Validation timings.
    pub validation: ValidationSettings,
    /// Ownership record.
    pub ownership: OwnershipSettings,
    /// Token storage.
    pub token: TokenSettings,
}

/// Default settings file: `$XDG_CONFIG_HOME/keygate/settings.ron`, else
/// `~/.config/keygate/settings.ron`.
pub fn default_settings_path() -> PathBuf {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME")
        && !xdg.is_empty()
    {
        return PathBuf::from(xdg).join("keygate/settings.ron");
    }
    let home = env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".config/keygate/settings.ron")
}

/// Per-user runtime directory for the PID record and token file.
///
/// Preference order:
/// - `$XDG_RUNTIME_DIR/keygate`
/// - `~/Library/Caches/keygate/run`
pub fn runtime_dir() -> PathBuf {
    if let Ok(xdg) = env::var("XDG_RUNTIME_DIR")
        && !xdg.is_empty()
    {
        return PathBuf::from(xdg).join("keygate");
    }
    let home = env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join("Library/Caches/keygate/run")
}

/// Create `dir` if needed and restrict it to the owner.
pub fn ensure_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Milliseconds to a duration, or `default`.
fn ms_or(v: Option<u64>, default: Duration) -> Duration {
    v.map(Duration::from_millis).unwrap_or(default)
}

impl Settings {
    /// Parse settings from RON text. `path` is used for error messages.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        ron::from_str(text).map_err(|source| Error::SettingsParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load settings. An explicit path must exist; a missing default file
    /// yields defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => {
                let p = default_settings_path();
                if !p.exists() {
                    return Ok(Self::default());
                }
                p
            }
        };
        let text = fs::read_to_string(&path).map_err(|source| Error::SettingsRead {
            path: path.clone(),
            source,
        })?;
        Self::parse(&text, &path)
    }

    /// Signature for conflict detection: the explicit setting, else the
    /// executable's file name.
    pub fn signature(&self) -> String {
        if let Some(sig) = &self.engine.signature {
            return sig.clone();
        }
        self.engine
            .executable
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_SIGNATURE.to_string())
    }

    /// Launch configuration, if an executable is configured.
    pub fn launch_cfg(&self) -> Option<LaunchCfg> {
        let exe = self.engine.executable.as_ref()?;
        let mut cfg = LaunchCfg::new(exe);
        cfg.args = self.engine.args.clone();
        cfg.env = self.engine.env.clone();
        Some(cfg)
    }

    /// Control client configuration.
    pub fn control_cfg(&self) -> ControlCfg {
        let mut cfg = ControlCfg {
            client_name: format!("keygate/{}", process::id()),
            ..ControlCfg::default()
        };
        if let Some(addr) = self.control.addr {
            cfg.addr = addr;
        }
        if let Some(enabled) = self.control.enabled {
            cfg.enabled = enabled;
        }
        cfg
    }

    /// Oracle configuration.
    pub fn oracle_cfg(&self) -> OracleCfg {
        let d = OracleCfg::default();
        let o = &self.oracle;
        OracleCfg {
            ttl: ms_or(o.ttl_ms, d.ttl),
            engine_timeout: ms_or(o.engine_timeout_ms, d.engine_timeout),
            local_timeout: ms_or(o.local_timeout_ms, d.local_timeout),
        }
    }

    /// Orchestrator configuration.
    pub fn orchestrator_cfg(&self) -> OrchestratorCfg {
        let d = OrchestratorCfg::default();
        let v = &self.validation;
        OrchestratorCfg {
            throttle: ms_or(v.throttle_ms, d.throttle),
            readiness_timeout: ms_or(v.readiness_timeout_ms, d.readiness_timeout),
            warmup_window: ms_or(v.warmup_window_ms, d.warmup_window),
            warmup_followup: ms_or(v.warmup_followup_ms, d.warmup_followup),
        }
    }

    /// Tracker configuration; the PID record defaults into `runtime`.
    pub fn tracker_cfg(&self, runtime: &Path) -> TrackerCfg {
        let o = &self.ownership;
        let pid_file = o
            .pid_file
            .clone()
            .unwrap_or_else(|| runtime.join("engine.pid"));
        let mut cfg = TrackerCfg::new(pid_file, self.signature());
        if let Some(secs) = o.stale_after_secs {
            cfg.stale_after = Duration::from_secs(secs);
        }
        cfg.term_grace = ms_or(o.term_grace_ms, cfg.term_grace);
        cfg
    }

    /// Token manager configuration; the token file defaults into `runtime`.
    pub fn token_cfg(&self, runtime: &Path) -> TokenCfg {
        let t = &self.token;
        let file = t
            .token_file
            .clone()
            .unwrap_or_else(|| runtime.join("control.token"));
        let mut cfg = TokenCfg::new(file, t.account.as_deref().unwrap_or(TOKEN_ACCOUNT));
        if let Some(secs) = t.cache_ttl_secs {
            cfg.cache_ttl = Duration::from_secs(secs);
        }
        cfg
    }

    /// Credential-store service name.
    pub fn keychain_service(&self) -> &str {
        self.token.service.as_deref().unwrap_or(KEYCHAIN_SERVICE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Settings> {
        Settings::parse(text, Path::new("settings.ron"))
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let s = parse("()").unwrap();
        let runtime = Path::new("/run/user/1/keygate");
        assert_eq!(s.oracle_cfg().ttl, readiness::SNAPSHOT_TTL);
        assert_eq!(s.orchestrator_cfg().throttle, readiness::THROTTLE);
        assert_eq!(
            s.tracker_cfg(runtime).pid_file,
            runtime.join("engine.pid")
        );
        assert_eq!(s.token_cfg(runtime).account, TOKEN_ACCOUNT);
        assert!(s.control_cfg().enabled);
        assert!(s.launch_cfg().is_none());
        assert_eq!(s.signature(), DEFAULT_SIGNATURE);
    }

    #[test]
    fn fields_override_defaults() {
        let s = parse(
            r#"(
                engine: (
                    executable: Some("/opt/homebrew/bin/kanata"),
                    args: ["--cfg", "/tmp/a.kbd"],
                ),
                control: (addr: Some("127.0.0.1:5829"), enabled: Some(false)),
                validation: (warmup_window_ms: Some(5000)),
                ownership: (stale_after_secs: Some(60)),
                token: (service: Some("test.service"), cache_ttl_secs: Some(1)),
            )"#,
        )
        .unwrap();

        let control = s.control_cfg();
        assert_eq!(control.addr.port(), 5829);
        assert!(!control.enabled);
        assert_eq!(
            s.orchestrator_cfg().warmup_window,
            Duration::from_secs(5)
        );
        let tracker = s.tracker_cfg(Path::new("/tmp"));
        assert_eq!(tracker.stale_after, Duration::from_secs(60));
        assert_eq!(tracker.signature, "kanata");
        assert_eq!(s.keychain_service(), "test.service");
        assert_eq!(s.token_cfg(Path::new("/tmp")).cache_ttl, Duration::from_secs(1));

        let launch = s.launch_cfg().unwrap();
        assert_eq!(
            launch.command_line(),
            "/opt/homebrew/bin/kanata --cfg /tmp/a.kbd"
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = parse("(engine: (exe: None))").unwrap_err();
        assert!(matches!(err, Error::SettingsParse { .. }));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(Some(&dir.path().join("nope.ron"))).unwrap_err();
        assert!(matches!(err, Error::SettingsRead { .. }));
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.ron");
        fs::write(&path, "(oracle: (ttl_ms: Some(10)))").unwrap();
        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.oracle_cfg().ttl, Duration::from_millis(10));
    }

    #[test]
    fn private_dir_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let run = dir.path().join("a/b");
        ensure_private_dir(&run).unwrap();
        let mode = fs::metadata(&run).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }
}

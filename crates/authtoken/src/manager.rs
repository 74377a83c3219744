//! The token manager: one secret, three places, kept in agreement.

use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    CredentialStore, Error, Result,
    file::{read_token_file, remove_token_file, write_token_file},
    generate::generate_token,
};

/// How long a token read from a backend is served from memory.
pub const CACHE_TTL: Duration = Duration::from_secs(30);

/// Token manager configuration.
#[derive(Debug, Clone)]
pub struct TokenCfg {
    /// Shared token file. Its parent directory is made owner-only, so it
    /// should be dedicated to keygate.
    pub token_file: PathBuf,
    /// Credential-store account name for the token.
    pub account: String,
    /// In-memory cache lifetime.
    pub cache_ttl: Duration,
}

impl TokenCfg {
    /// Configuration with the default cache lifetime.
    pub fn new(token_file: impl Into<PathBuf>, account: impl Into<String>) -> Self {
        Self {
            token_file: token_file.into(),
            account: account.into(),
            cache_ttl: CACHE_TTL,
        }
    }
}

/// Cached token and when it was cached.
#[derive(Debug, Clone)]
struct Cached {
    /// The secret.
    token: String,
    /// Cache insertion time.
    at: Instant,
}

/// Serialized access to the session token.
///
/// Every public operation holds the internal lock for its whole duration, so
/// a read-repair can never interleave with a concurrent `set_token`.
pub struct TokenManager {
    /// Paths and names.
    cfg: TokenCfg,
    /// Secure backend.
    store: Arc<dyn CredentialStore>,
    /// In-memory cache; also the serialization point.
    cache: Mutex<Option<Cached>>,
}

impl TokenManager {
    /// Create a manager over `store` and the configured shared file.
    pub fn new(cfg: TokenCfg, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            cfg,
            store,
            cache: Mutex::new(None),
        }
    }

    /// Manager configuration.
    pub fn cfg(&self) -> &TokenCfg {
        &self.cfg
    }

    /// Return the token, generating and persisting one if none exists anywhere.
    pub fn ensure_token(&self) -> Result<String> {
        let mut cache = self.cache.lock();
        if let Some(token) = self.read_locked(&mut cache)? {
            return Ok(token);
        }
        let token = generate_token();
        info!("no session token found; generated a new one");
        self.write_locked(&mut cache, &token)?;
        Ok(token)
    }

    /// Current token: memory cache, then credential store, then shared file.
    ///
    /// A token found only in the file is written back to the credential store.
    pub fn current_token(&self) -> Result<Option<String>> {
        let mut cache = self.cache.lock();
        self.read_locked(&mut cache)
    }

    /// Replace the token in the credential store, the shared file and memory,
    /// in that order. Any failure is returned and the cache is left cleared.
    pub fn set_token(&self, token: &str) -> Result<()> {
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::EmptyToken);
        }
        let mut cache = self.cache.lock();
        self.write_locked(&mut cache, token)
    }

    /// Remove the token everywhere. Absent entries are not errors.
    pub fn clear_token(&self) -> Result<()> {
        let mut cache = self.cache.lock();
        *cache = None;
        self.store.delete(&self.cfg.account)?;
        remove_token_file(&self.cfg.token_file)?;
        debug!("session token cleared");
        Ok(())
    }

    /// Read path shared by `current_token` and `ensure_token`.
    fn read_locked(&self, cache: &mut Option<Cached>) -> Result<Option<String>> {
        if let Some(c) = cache.as_ref()
            && c.at.elapsed() < self.cfg.cache_ttl
        {
            return Ok(Some(c.token.clone()));
        }
        *cache = None;

        let from_store = match self.store.get(&self.cfg.account) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "credential store read failed; falling back to token file");
                None
            }
        };
        if let Some(token) = from_store {
            // Backfill the file if it disagrees or is missing.
            let on_disk = read_token_file(&self.cfg.token_file).unwrap_or_default();
            if on_disk.as_deref() != Some(token.as_str()) {
                debug!("token file missing or stale; repairing from credential store");
                if let Err(e) = write_token_file(&self.cfg.token_file, &token) {
                    warn!(error = %e, "failed to repair token file");
                }
            }
            *cache = Some(Cached {
                token: token.clone(),
                at: Instant::now(),
            });
            return Ok(Some(token));
        }

        let Some(token) = read_token_file(&self.cfg.token_file)? else {
            return Ok(None);
        };
        debug!("credential store empty; repairing from token file");
        if let Err(e) = self.store.put(&self.cfg.account, &token) {
            warn!(error = %e, "failed to write token back to credential store");
        }
        *cache = Some(Cached {
            token: token.clone(),
            at: Instant::now(),
        });
        Ok(Some(token))
    }

    /// Write path shared by `set_token` and `ensure_token`.
    fn write_locked(&self, cache: &mut Option<Cached>, token: &str) -> Result<()> {
        *cache = None;
        self.store.put(&self.cfg.account, token)?;
        write_token_file(&self.cfg.token_file, token)?;
        *cache = Some(Cached {
            token: token.to_string(),
            at: Instant::now(),
        });
        Ok(())
    }
}

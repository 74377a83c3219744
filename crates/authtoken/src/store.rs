//! Credential-store seam and the in-memory backend.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::{Error, Result};

/// Key/value secret storage scoped to one service namespace.
pub trait CredentialStore: Send + Sync {
    /// Read the secret for `account`. Absence is `Ok(None)`.
    fn get(&self, account: &str) -> Result<Option<String>>;
    /// Create or replace the secret for `account`.
    fn put(&self, account: &str, secret: &str) -> Result<()>;
    /// Delete the secret for `account`. Absence is not an error.
    fn delete(&self, account: &str) -> Result<()>;
}

/// Process-local store. Used in tests and where no keychain exists.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Secrets by account.
    items: Mutex<HashMap<String, String>>,
    /// When set, every `put` fails.
    fail_writes: Mutex<bool>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail, simulating a locked keychain.
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, account: &str) -> Result<Option<String>> {
        Ok(self.items.lock().get(account).cloned())
    }

    fn put(&self, account: &str, secret: &str) -> Result<()> {
        if *self.fail_writes.lock() {
            return Err(Error::CredentialStore("store is locked".into()));
        }
        self.items
            .lock()
            .insert(account.to_string(), secret.to_string());
        Ok(())
    }

    fn delete(&self, account: &str) -> Result<()> {
        self.items.lock().remove(account);
        Ok(())
    }
}

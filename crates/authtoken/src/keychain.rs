//! macOS keychain backend over the Security framework.
//!
//! Items are generic passwords filed under one service, readable only while
//! the device is unlocked and never migrated to another device. Secrets are
//! handed to the framework in memory; no helper process is involved.

use security_framework::{
    access_control::{ProtectionMode, SecAccessControl},
    base::Error as SecError,
    passwords::{
        PasswordOptions, delete_generic_password, get_generic_password,
        set_generic_password_options,
    },
};
use tracing::debug;

use crate::{CredentialStore, Error, Result};

/// `errSecItemNotFound`.
const ERR_SEC_ITEM_NOT_FOUND: i32 = -25300;

/// Attributes of one keychain item, minus the secret.
struct ItemSpec<'a> {
    /// `kSecAttrService`.
    service: &'a str,
    /// `kSecAttrAccount`.
    account: &'a str,
    /// `kSecAttrAccessible`.
    protection: ProtectionMode,
}

impl ItemSpec<'_> {
    /// Framework options for writing this item.
    fn options(self) -> Result<PasswordOptions> {
        let access = SecAccessControl::create_with_protection(Some(self.protection), 0)
            .map_err(|e| store_error("access control", &e))?;
        let mut options = PasswordOptions::new_generic_password(self.service, self.account);
        options.set_access_control(access);
        Ok(options)
    }
}

/// Wrap a framework error.
fn store_error(op: &str, e: &SecError) -> Error {
    Error::CredentialStore(format!("keychain {op} failed: {e} (status {})", e.code()))
}

/// The user's keychain.
#[derive(Debug, Clone)]
pub struct KeychainStore {
    /// Service attribute every item is filed under.
    service: String,
}

impl KeychainStore {
    /// Store items under `service`.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Attributes for `account`'s item.
    fn item<'a>(&'a self, account: &'a str) -> ItemSpec<'a> {
        ItemSpec {
            service: &self.service,
            account,
            protection: ProtectionMode::AccessibleWhenUnlockedThisDeviceOnly,
        }
    }
}

impl CredentialStore for KeychainStore {
    fn get(&self, account: &str) -> Result<Option<String>> {
        match get_generic_password(&self.service, account) {
            Ok(bytes) => {
                let secret = String::from_utf8(bytes).map_err(|_| {
                    Error::CredentialStore("keychain item is not UTF-8".to_string())
                })?;
                Ok((!secret.is_empty()).then_some(secret))
            }
            Err(e) if e.code() == ERR_SEC_ITEM_NOT_FOUND => Ok(None),
            Err(e) => Err(store_error("read", &e)),
        }
    }

    fn put(&self, account: &str, secret: &str) -> Result<()> {
        let options = self.item(account).options()?;
        set_generic_password_options(secret.as_bytes(), options)
            .map_err(|e| store_error("write", &e))?;
        debug!(service = %self.service, account, "keychain item written");
        Ok(())
    }

    fn delete(&self, account: &str) -> Result<()> {
        match delete_generic_password(&self.service, account) {
            Err(e) if e.code() != ERR_SEC_ITEM_NOT_FOUND => Err(store_error("delete", &e)),
            _ => Ok(()),
        }
    }
}

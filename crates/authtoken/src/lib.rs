//! Session token for authenticating to the remapping engine.
//!
//! The token lives in up to three places: a short-lived in-memory cache, a
//! secure credential store ([`CredentialStore`]), and a shared file readable
//! only by the owner. [`TokenManager`] keeps them in agreement: reads fall
//! through cache → store → file and backfill whichever backend was missing
//! the value; writes go to every backend before returning and surface any
//! failure.
#![warn(missing_docs)]

mod error;
mod file;
mod generate;
#[cfg(target_os = "macos")]
mod keychain;
mod manager;
mod store;

pub use error::{Error, Result};
pub use file::{read_token_file, remove_token_file, write_token_file};
pub use generate::{TOKEN_BYTES, generate_token};
pub use manager::{CACHE_TTL, TokenCfg, TokenManager};
#[cfg(target_os = "macos")]
pub use keychain::KeychainStore;
pub use store::{CredentialStore, MemoryStore};

//! Token generation.

use std::{
    process,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore as _, rngs::OsRng};
use tracing::warn;

/// Number of random bytes in a token.
pub const TOKEN_BYTES: usize = 32;

/// Counter mixed into fallback tokens so consecutive calls differ.
static FALLBACK_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a fresh URL-safe token from the OS CSPRNG.
///
/// If the OS source fails, a deterministic non-cryptographic token is produced
/// instead and the degradation is logged.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    if let Err(e) = OsRng.try_fill_bytes(&mut bytes) {
        warn!(error = %e, "secure random source failed; using degraded token generator");
        bytes = fallback_bytes();
    }
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Non-cryptographic bytes seeded from time, pid and a counter (splitmix64).
fn fallback_bytes() -> [u8; TOKEN_BYTES] {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let mut state = nanos
        ^ (u64::from(process::id()) << 32)
        ^ FALLBACK_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut out = [0u8; TOKEN_BYTES];
    for chunk in out.chunks_mut(8) {
        state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        chunk.copy_from_slice(&z.to_le_bytes()[..chunk.len()]);
    }
    out
}

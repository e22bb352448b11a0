//! One-time crypto readiness check.
//!
//! Provider construction calls [`ensure_crypto_ready`], which probes the OS
//! RNG exactly once per process; repeats are no-ops. Key generation without
//! a working RNG must fail at construction, not on the first encryption.

use std::sync::OnceLock;

use cryptoshred_transit::error::{Result, TransitError};

static CRYPTO_READY: OnceLock<std::result::Result<(), String>> = OnceLock::new();

/// Probe the OS RNG once per process. Idempotent.
pub fn ensure_crypto_ready() -> Result<()> {
    let outcome = CRYPTO_READY.get_or_init(|| {
        let mut probe = [0u8; 32];
        getrandom::getrandom(&mut probe).map_err(|e| e.to_string())
    });
    outcome.clone().map_err(|reason| TransitError::Crypto {
        reason: format!("OS RNG unavailable: {reason}"),
    })
}

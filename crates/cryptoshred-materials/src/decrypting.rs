//! Decrypting materials provider.
//!
//! Recovers a usable cipher from a previously issued wrapped DEK. The
//! context is validated strictly before the unwrap RPC; after erasure the
//! unwrap fails with `KeyNotFound`, which callers handle as the expected
//! GDPR state rather than an infrastructure failure. Never retries; retry
//! lives entirely inside the client.

use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroize;

use cryptoshred_transit::error::{Result, TransitError};
use cryptoshred_transit::TransitKeyClient;

use crate::context::EncryptionContext;
use crate::dek::{DataKey, DekCipher};
use crate::init::ensure_crypto_ready;

/// Stateless beyond the shared client; safe for unlimited concurrent calls.
pub struct DecryptingMaterialsProvider {
    client: Arc<TransitKeyClient>,
}

impl DecryptingMaterialsProvider {
    pub fn new(client: Arc<TransitKeyClient>) -> Result<Self> {
        ensure_crypto_ready()?;
        Ok(Self { client })
    }

    /// Reconstruct the cipher for a previously issued wrapped DEK.
    ///
    /// The context must have been issued for `subject_id`, carry a parseable
    /// creation timestamp and a non-empty version; violations fail with
    /// `InvalidContext` before any RPC.
    pub async fn material_for(
        &self,
        subject_id: &str,
        encrypted_key: &str,
        context: &str,
    ) -> Result<DekCipher> {
        if subject_id.trim().is_empty() {
            return Err(TransitError::Validation {
                field: "subject_id",
                reason: "must not be blank".into(),
            });
        }
        if encrypted_key.is_empty() {
            return Err(TransitError::Validation {
                field: "encrypted_key",
                reason: "must not be empty".into(),
            });
        }

        EncryptionContext::parse(context)?.validate_for(subject_id)?;

        let key_name = self.client.key_name(subject_id);
        let mut key_bytes = self.client.decrypt(&key_name, encrypted_key, context).await?;

        let dek = DataKey::from_bytes(&key_bytes);
        key_bytes.zeroize();
        let dek = dek?;

        let cipher = DekCipher::new(&dek);
        drop(dek);

        debug!(key = %key_name, "recovered decryption material");
        Ok(cipher)
    }
}

//! Encrypting materials provider.
//!
//! Produces fresh envelope material per call: a new DEK, an AES-256-GCM
//! cipher bound to it, the wrapped DEK from the remote transit service, and
//! the context string that must accompany the wrapped key to decryption.

use std::sync::Arc;
use tracing::debug;

use cryptoshred_transit::error::{Result, TransitError};
use cryptoshred_transit::TransitKeyClient;

use crate::context::EncryptionContext;
use crate::dek::{DataKey, DekCipher};
use crate::init::ensure_crypto_ready;

/// Everything a collaborator needs to encrypt one payload for one subject.
///
/// `encrypted_key` and `context` are safe to persist alongside the encrypted
/// payload; the cipher (and the DEK inside it) must not outlive the call
/// path that uses it.
#[derive(Debug)]
pub struct EncryptionMaterial {
    pub cipher: DekCipher,
    pub encrypted_key: String,
    pub context: String,
}

/// Stateless beyond the shared client; safe for unlimited concurrent calls.
/// Every call produces an independent DEK.
pub struct EncryptingMaterialsProvider {
    client: Arc<TransitKeyClient>,
}

impl EncryptingMaterialsProvider {
    pub fn new(client: Arc<TransitKeyClient>) -> Result<Self> {
        ensure_crypto_ready()?;
        Ok(Self { client })
    }

    /// Produce fresh envelope material for a subject.
    ///
    /// The subject's remote key is provisioned lazily on its first
    /// encryption; client errors propagate unchanged.
    pub async fn material_for(&self, subject_id: &str) -> Result<EncryptionMaterial> {
        if subject_id.trim().is_empty() {
            return Err(TransitError::Validation {
                field: "subject_id",
                reason: "must not be blank".into(),
            });
        }

        let dek = DataKey::generate()?;
        let cipher = DekCipher::new(&dek);

        let key_name = self.client.key_name(subject_id);
        let context = EncryptionContext::for_subject(subject_id).encode();

        let encrypted_key = self
            .client
            .encrypt(&key_name, dek.as_bytes(), &context)
            .await?;
        // The cipher owns its key schedule now; drop the raw DEK.
        drop(dek);

        debug!(key = %key_name, "issued encryption material");
        Ok(EncryptionMaterial {
            cipher,
            encrypted_key,
            context,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptoshred_transit::{InMemoryTransit, TransitConfig};
    use std::time::Duration;

    fn test_client() -> Arc<TransitKeyClient> {
        let config = TransitConfig::builder()
            .endpoint("http://127.0.0.1:8200")
            .credential("s.test")
            .retry_base_backoff(Duration::from_millis(1))
            .build()
            .unwrap();
        Arc::new(TransitKeyClient::with_transport(
            config,
            Arc::new(InMemoryTransit::new()),
        ))
    }

    #[tokio::test]
    async fn issues_complete_material() {
        let provider = EncryptingMaterialsProvider::new(test_client()).unwrap();
        let material = provider.material_for("user-42").await.unwrap();

        assert!(!material.encrypted_key.is_empty());
        assert!(material.context.contains("subjectId=user-42"));

        let blob = material.cipher.encrypt(b"payload", material.context.as_bytes()).unwrap();
        assert_eq!(
            material.cipher.decrypt(&blob, material.context.as_bytes()).unwrap(),
            b"payload"
        );
    }

    #[tokio::test]
    async fn each_call_gets_an_independent_dek() {
        let provider = EncryptingMaterialsProvider::new(test_client()).unwrap();
        let a = provider.material_for("user-42").await.unwrap();
        let b = provider.material_for("user-42").await.unwrap();

        assert_ne!(a.encrypted_key, b.encrypted_key);
        // Material B's cipher must not decrypt blobs sealed by material A.
        let blob = a.cipher.encrypt(b"data", b"").unwrap();
        assert!(b.cipher.decrypt(&blob, b"").is_err());
    }

    #[tokio::test]
    async fn blank_subject_fails_synchronously() {
        let provider = EncryptingMaterialsProvider::new(test_client()).unwrap();
        for subject in ["", "  "] {
            let err = provider.material_for(subject).await.unwrap_err();
            assert!(matches!(err, TransitError::Validation { .. }), "{err:?}");
        }
    }
}

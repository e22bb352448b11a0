//! Data Encryption Key primitives.
//!
//! Each encryption call gets a fresh random 256-bit DEK. Payload content is
//! encrypted with the DEK; the DEK itself is wrapped by the subject's remote
//! key and only the wrapped blob is ever persisted.
//!
//! Cipher blob wire format: `[version=1:1B][IV:12B][ciphertext + tag]`

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use zeroize::{Zeroize, ZeroizeOnDrop};

use cryptoshred_transit::error::{Result, TransitError};

/// DEK length in bytes (256 bits).
pub const DEK_LENGTH: usize = 32;

/// Cipher blob wire format version.
pub const BLOB_VERSION: u8 = 1;

/// AES-GCM IV length in bytes (96 bits per NIST recommendation).
pub const IV_LENGTH: usize = 12;

/// AES-GCM tag length in bytes (128 bits).
pub const TAG_LENGTH: usize = 16;

/// A 256-bit data encryption key. Zeroized on drop; exists only in process
/// memory and is never persisted or logged in plaintext.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DataKey([u8; DEK_LENGTH]);

impl DataKey {
    /// Generate a fresh key from the OS RNG.
    pub fn generate() -> Result<Self> {
        let mut key = [0u8; DEK_LENGTH];
        getrandom::getrandom(&mut key)
            .map_err(|e| TransitError::Crypto {
                reason: format!("OS RNG failed: {e}"),
            })?;
        Ok(Self(key))
    }

    /// Adopt recovered key material, enforcing the expected AEAD key size.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != DEK_LENGTH {
            return Err(TransitError::Crypto {
                reason: format!(
                    "recovered key has {} bytes, expected {DEK_LENGTH}",
                    bytes.len()
                ),
            });
        }
        let mut key = [0u8; DEK_LENGTH];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// AES-256-GCM cipher bound to one DEK.
///
/// The cipher holds only the expanded key schedule (zeroized on drop via the
/// aes-gcm `zeroize` feature); the originating [`DataKey`] can be dropped as
/// soon as the cipher exists.
pub struct DekCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for DekCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DekCipher").finish_non_exhaustive()
    }
}

impl DekCipher {
    pub fn new(key: &DataKey) -> Self {
        // Key length is fixed by the DataKey type.
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .expect("DataKey is exactly the AES-256 key size");
        Self { cipher }
    }

    /// Encrypt a payload, binding it to `aad`. Produces
    /// `[version][IV][ciphertext + tag]` with a fresh random IV.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let mut iv = [0u8; IV_LENGTH];
        getrandom::getrandom(&mut iv).map_err(|e| TransitError::Crypto {
            reason: format!("OS RNG failed: {e}"),
        })?;
        let nonce = Nonce::from_slice(&iv);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| TransitError::Crypto {
                reason: format!("AES-256-GCM encryption failed: {e}"),
            })?;

        let mut blob = Vec::with_capacity(1 + IV_LENGTH + ciphertext.len());
        blob.push(BLOB_VERSION);
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Decrypt a `[version][IV][ciphertext + tag]` blob bound to `aad`.
    pub fn decrypt(&self, blob: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let min_length = 1 + IV_LENGTH + TAG_LENGTH;
        if blob.len() < min_length {
            return Err(TransitError::Crypto {
                reason: "encrypted blob too short".into(),
            });
        }
        if blob[0] != BLOB_VERSION {
            return Err(TransitError::Crypto {
                reason: format!("unsupported blob version {}", blob[0]),
            });
        }

        let iv = &blob[1..1 + IV_LENGTH];
        let ciphertext = &blob[1 + IV_LENGTH..];
        let nonce = Nonce::from_slice(iv);

        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|e| TransitError::Crypto {
                reason: format!("AES-256-GCM decryption failed: {e}"),
            })
    }
}

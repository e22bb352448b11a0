//! Per-subject envelope-encryption materials on top of the transit client:
//! fresh DEKs, AES-256-GCM ciphers bound to them, wrapped keys from the
//! remote service, and strict context validation on recovery.

pub mod context;
pub mod decrypting;
pub mod dek;
pub mod encrypting;
pub mod init;

pub use context::{EncryptionContext, PROVIDER_VERSION};
pub use decrypting::DecryptingMaterialsProvider;
pub use dek::{DataKey, DekCipher, BLOB_VERSION, DEK_LENGTH, IV_LENGTH, TAG_LENGTH};
pub use encrypting::{EncryptingMaterialsProvider, EncryptionMaterial};
pub use init::ensure_crypto_ready;

pub use cryptoshred_transit::{Result, TransitError};

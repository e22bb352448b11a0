//! JSON bodies of the transit wire contract.
//!
//! Requests:  `POST {base}/encrypt/{key}`   `{plaintext: b64, context?: b64}`
//!            `POST {base}/decrypt/{key}`   `{ciphertext, context?: b64}`
//!            `POST {base}/keys/{key}`      `{type: "aes256-gcm96"}`
//!            `POST {base}/keys/{key}/config` `{deletion_allowed: true}`
//!            `POST {base}/rewrap/{key}`    `{ciphertext}`
//! Responses: `{data: {ciphertext}}`, `{data: {plaintext: b64}}`,
//!            `{data: {keys: [...]}}`; errors carry `{errors: [...]}`.

use serde::{Deserialize, Serialize};

/// AEAD key type requested on key creation.
pub const KEY_TYPE: &str = "aes256-gcm96";

#[derive(Debug, Serialize)]
pub struct EncryptRequestBody {
    pub plaintext: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DecryptRequestBody {
    pub ciphertext: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateKeyBody {
    #[serde(rename = "type")]
    pub key_type: String,
}

impl Default for CreateKeyBody {
    fn default() -> Self {
        Self {
            key_type: KEY_TYPE.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct KeyConfigBody {
    pub deletion_allowed: bool,
}

#[derive(Debug, Serialize)]
pub struct RewrapRequestBody {
    pub ciphertext: String,
}

/// Generic `{data: ...}` envelope every successful response uses.
#[derive(Debug, Deserialize)]
pub struct SecretResponse<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub struct CiphertextData {
    pub ciphertext: String,
}

#[derive(Debug, Deserialize)]
pub struct PlaintextData {
    pub plaintext: String,
}

#[derive(Debug, Deserialize)]
pub struct KeyListData {
    pub keys: Vec<String>,
}

/// `{errors: [...]}` body remote services attach to non-2xx responses.
#[derive(Debug, Deserialize, Default)]
pub struct ErrorBody {
    #[serde(default)]
    pub errors: Vec<String>,
}

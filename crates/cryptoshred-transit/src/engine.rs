//! In-memory transit engine.
//!
//! Implements the wire contract behind [`TransitTransport`] without a
//! network: key create/read/delete/list/rotate, wrap/unwrap with context
//! binding, the `deletion_allowed` gate, and fault injection for retry
//! tests. Wrapped-key blobs are `vault:v<version>:<base64 handle>`; the
//! engine never hands out key material, only handles into its wrap table,
//! which is exactly the property the real service provides.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::error::{Result, TransitError};
use crate::transport::{ApiRequest, ApiResponse, TransitTransport, Verb};

const CIPHERTEXT_PREFIX: &str = "vault:v";

#[derive(Debug)]
struct KeyEntry {
    current_version: u32,
    deletion_allowed: bool,
}

#[derive(Debug, Clone)]
struct WrapEntry {
    key_name: String,
    plaintext: String,
    context: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    Status(u16),
    Transport,
}

/// In-memory stand-in for the remote transit service.
#[derive(Default)]
pub struct InMemoryTransit {
    keys: Mutex<HashMap<String, KeyEntry>>,
    wraps: Mutex<HashMap<u64, WrapEntry>>,
    next_wrap_id: AtomicU64,
    requests: AtomicU64,
    faults: Mutex<VecDeque<Fault>>,
    fail_forever: Mutex<Option<u16>>,
}

impl InMemoryTransit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total `execute` calls observed, including injected failures. One call
    /// is one attempt, so this is what retry-budget tests assert on.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    /// Names of the keys currently provisioned.
    pub fn key_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.keys.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Provision a key directly, bypassing the wire contract.
    pub fn seed_key(&self, name: &str) {
        self.keys.lock().insert(
            name.to_string(),
            KeyEntry {
                current_version: 1,
                deletion_allowed: false,
            },
        );
    }

    /// The next `count` requests fail with `status` before any routing.
    pub fn push_status_failures(&self, status: u16, count: usize) {
        let mut faults = self.faults.lock();
        for _ in 0..count {
            faults.push_back(Fault::Status(status));
        }
    }

    /// The next `count` requests fail below HTTP (connect/reset).
    pub fn push_transport_failures(&self, count: usize) {
        let mut faults = self.faults.lock();
        for _ in 0..count {
            faults.push_back(Fault::Transport);
        }
    }

    /// Every request from now on fails with `status`.
    pub fn set_fail_forever(&self, status: u16) {
        *self.fail_forever.lock() = Some(status);
    }

    pub fn clear_failures(&self) {
        *self.fail_forever.lock() = None;
        self.faults.lock().clear();
    }

    fn error_response(status: u16, message: &str) -> ApiResponse {
        ApiResponse {
            status,
            body: Some(serde_json::json!({ "errors": [message] })),
        }
    }

    fn empty_response(status: u16) -> ApiResponse {
        ApiResponse { status, body: None }
    }

    fn format_ciphertext(version: u32, wrap_id: u64) -> String {
        format!(
            "{}{}:{}",
            CIPHERTEXT_PREFIX,
            version,
            BASE64.encode(wrap_id.to_be_bytes())
        )
    }

    fn parse_ciphertext(ciphertext: &str) -> Option<u64> {
        let rest = ciphertext.strip_prefix(CIPHERTEXT_PREFIX)?;
        let (_version, handle) = rest.split_once(':')?;
        let bytes = BASE64.decode(handle).ok()?;
        Some(u64::from_be_bytes(bytes.try_into().ok()?))
    }

    fn body_str(body: Option<&serde_json::Value>, field: &str) -> Option<String> {
        body?.get(field)?.as_str().map(|s| s.to_string())
    }

    fn encrypt(&self, key_name: &str, body: Option<&serde_json::Value>) -> ApiResponse {
        let keys = self.keys.lock();
        let Some(entry) = keys.get(key_name) else {
            return Self::error_response(404, "encryption key not found");
        };
        let Some(plaintext) = Self::body_str(body, "plaintext") else {
            return Self::error_response(400, "missing plaintext");
        };
        if BASE64.decode(&plaintext).is_err() {
            return Self::error_response(400, "plaintext is not base64");
        }
        let context = Self::body_str(body, "context");
        let wrap_id = self.next_wrap_id.fetch_add(1, Ordering::SeqCst);
        self.wraps.lock().insert(
            wrap_id,
            WrapEntry {
                key_name: key_name.to_string(),
                plaintext,
                context,
            },
        );
        ApiResponse {
            status: 200,
            body: Some(serde_json::json!({
                "data": { "ciphertext": Self::format_ciphertext(entry.current_version, wrap_id) }
            })),
        }
    }

    fn decrypt(&self, key_name: &str, body: Option<&serde_json::Value>) -> ApiResponse {
        if !self.keys.lock().contains_key(key_name) {
            return Self::error_response(404, "encryption key not found");
        }
        let Some(ciphertext) = Self::body_str(body, "ciphertext") else {
            return Self::error_response(400, "missing ciphertext");
        };
        let Some(wrap_id) = Self::parse_ciphertext(&ciphertext) else {
            return Self::error_response(400, "invalid ciphertext");
        };
        let wraps = self.wraps.lock();
        let Some(wrap) = wraps.get(&wrap_id) else {
            return Self::error_response(400, "invalid ciphertext");
        };
        if wrap.key_name != key_name {
            return Self::error_response(400, "ciphertext was not produced by this key");
        }
        if wrap.context != Self::body_str(body, "context") {
            return Self::error_response(400, "context does not match");
        }
        ApiResponse {
            status: 200,
            body: Some(serde_json::json!({ "data": { "plaintext": wrap.plaintext.clone() } })),
        }
    }

    fn rewrap(&self, key_name: &str, body: Option<&serde_json::Value>) -> ApiResponse {
        let current_version = {
            let keys = self.keys.lock();
            match keys.get(key_name) {
                Some(entry) => entry.current_version,
                None => return Self::error_response(404, "encryption key not found"),
            }
        };
        let Some(ciphertext) = Self::body_str(body, "ciphertext") else {
            return Self::error_response(400, "missing ciphertext");
        };
        let Some(wrap_id) = Self::parse_ciphertext(&ciphertext) else {
            return Self::error_response(400, "invalid ciphertext");
        };
        let mut wraps = self.wraps.lock();
        let Some(wrap) = wraps.get(&wrap_id).cloned() else {
            return Self::error_response(400, "invalid ciphertext");
        };
        if wrap.key_name != key_name {
            return Self::error_response(400, "ciphertext was not produced by this key");
        }
        let new_id = self.next_wrap_id.fetch_add(1, Ordering::SeqCst);
        wraps.insert(new_id, wrap);
        ApiResponse {
            status: 200,
            body: Some(serde_json::json!({
                "data": { "ciphertext": Self::format_ciphertext(current_version, new_id) }
            })),
        }
    }

    fn create_key(&self, key_name: &str) -> ApiResponse {
        let mut keys = self.keys.lock();
        if keys.contains_key(key_name) {
            return Self::error_response(400, "key already exists");
        }
        keys.insert(
            key_name.to_string(),
            KeyEntry {
                current_version: 1,
                deletion_allowed: false,
            },
        );
        Self::empty_response(204)
    }

    fn configure_key(&self, key_name: &str, body: Option<&serde_json::Value>) -> ApiResponse {
        let mut keys = self.keys.lock();
        let Some(entry) = keys.get_mut(key_name) else {
            return Self::error_response(404, "encryption key not found");
        };
        if let Some(allowed) = body
            .and_then(|b| b.get("deletion_allowed"))
            .and_then(|v| v.as_bool())
        {
            entry.deletion_allowed = allowed;
        }
        Self::empty_response(204)
    }

    fn rotate_key(&self, key_name: &str) -> ApiResponse {
        let mut keys = self.keys.lock();
        let Some(entry) = keys.get_mut(key_name) else {
            return Self::error_response(404, "encryption key not found");
        };
        entry.current_version += 1;
        Self::empty_response(204)
    }

    fn delete_key(&self, key_name: &str) -> ApiResponse {
        let mut keys = self.keys.lock();
        let Some(entry) = keys.get(key_name) else {
            return Self::error_response(404, "encryption key not found");
        };
        if !entry.deletion_allowed {
            return Self::error_response(400, "deletion is not allowed for this key");
        }
        keys.remove(key_name);
        Self::empty_response(204)
    }

    fn list_keys(&self) -> ApiResponse {
        let names = self.key_names();
        if names.is_empty() {
            // The real service 404s an empty listing.
            return Self::empty_response(404);
        }
        ApiResponse {
            status: 200,
            body: Some(serde_json::json!({ "data": { "keys": names } })),
        }
    }

    fn route(&self, request: &ApiRequest) -> ApiResponse {
        let segments: Vec<&str> = request.path.split('/').collect();
        let body = request.body.as_ref();
        match (request.verb, segments.as_slice()) {
            (Verb::Post, ["encrypt", name]) => self.encrypt(name, body),
            (Verb::Post, ["decrypt", name]) => self.decrypt(name, body),
            (Verb::Post, ["rewrap", name]) => self.rewrap(name, body),
            (Verb::Get, ["keys", name]) => {
                if self.keys.lock().contains_key(*name) {
                    ApiResponse {
                        status: 200,
                        body: Some(serde_json::json!({ "data": { "name": name } })),
                    }
                } else {
                    Self::empty_response(404)
                }
            }
            (Verb::Post, ["keys", name]) => self.create_key(name),
            (Verb::Post, ["keys", name, "config"]) => self.configure_key(name, body),
            (Verb::Post, ["keys", name, "rotate"]) => self.rotate_key(name),
            (Verb::Delete, ["keys", name]) => self.delete_key(name),
            (Verb::List, ["keys"]) => self.list_keys(),
            _ => Self::error_response(404, "unsupported path"),
        }
    }
}

#[async_trait]
impl TransitTransport for InMemoryTransit {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        if let Some(status) = *self.fail_forever.lock() {
            return Ok(Self::error_response(status, "injected failure"));
        }
        if let Some(fault) = self.faults.lock().pop_front() {
            return match fault {
                Fault::Status(status) => Ok(Self::error_response(status, "injected failure")),
                Fault::Transport => Err(TransitError::connectivity("injected transport failure")),
            };
        }

        Ok(self.route(request))
    }
}

//! Asynchronous transit-key client.
//!
//! Reliable RPC façade over the remote key-wrap service: per-subject key
//! naming, lazy idempotent key provisioning, wrap/unwrap, GDPR erasure,
//! retry with capped jittered backoff, and an error taxonomy that keeps
//! "key erased" distinguishable from "infrastructure failure".
//!
//! Retries live entirely here. Providers and other callers see exactly one
//! terminal outcome per logical operation.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::TransitConfig;
use crate::error::{Result, TransitError};
use crate::key_name;
use crate::redact;
use crate::retry::RetrySchedule;
use crate::transport::{ApiRequest, ApiResponse, HttpTransport, TransitTransport, Verb};
use crate::wire::{
    CiphertextData, CreateKeyBody, DecryptRequestBody, EncryptRequestBody, ErrorBody, KeyConfigBody,
    KeyListData, PlaintextData, RewrapRequestBody, SecretResponse,
};

/// Client for the remote transit service.
///
/// Shares one connection pool across all operations and is safe for
/// unlimited concurrent use; the only mutable state is the atomic
/// request-correlation counter and the closed flag.
pub struct TransitKeyClient {
    transport: Arc<dyn TransitTransport>,
    config: TransitConfig,
    request_counter: AtomicU64,
    closed: AtomicBool,
}

impl TransitKeyClient {
    /// Connect over HTTP using the validated configuration.
    pub fn connect(config: TransitConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        Ok(Self::with_transport(config, transport))
    }

    /// Build the client on an explicit transport (tests, embedding).
    pub fn with_transport(config: TransitConfig, transport: Arc<dyn TransitTransport>) -> Self {
        Self {
            transport,
            config,
            request_counter: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Derive the remote key name for a subject. Pure and deterministic;
    /// output matches `[A-Za-z0-9_-]+`.
    pub fn key_name(&self, subject_id: &str) -> String {
        key_name::key_name(&self.config.key_prefix, subject_id)
    }

    /// Wrap `plaintext` under the subject key `key_name`, provisioning the
    /// key first if this is the subject's first encryption.
    pub async fn encrypt(&self, key_name: &str, plaintext: &[u8], context: &str) -> Result<String> {
        self.ensure_key_exists(key_name).await?;

        let body = EncryptRequestBody {
            plaintext: BASE64.encode(plaintext),
            context: encode_context(context),
        };
        let request = ApiRequest::new(Verb::Post, format!("encrypt/{key_name}"))
            .with_body(to_body(&body)?);
        let response = self.call("encrypt", request).await?;
        if response.status == 200 {
            let parsed: SecretResponse<CiphertextData> = parse_data(response.body)?;
            Ok(parsed.data.ciphertext)
        } else {
            Err(self.remote_error(&response, key_name, true))
        }
    }

    /// Unwrap a previously issued blob. A missing key surfaces
    /// [`TransitError::KeyNotFound`], the expected state after erasure.
    pub async fn decrypt(&self, key_name: &str, ciphertext: &str, context: &str) -> Result<Vec<u8>> {
        if ciphertext.is_empty() {
            return Err(TransitError::validation("ciphertext", "must not be empty"));
        }

        let body = DecryptRequestBody {
            ciphertext: ciphertext.to_string(),
            context: encode_context(context),
        };
        let request = ApiRequest::new(Verb::Post, format!("decrypt/{key_name}"))
            .with_body(to_body(&body)?);
        let response = self.call("decrypt", request).await?;
        if response.status == 200 {
            let parsed: SecretResponse<PlaintextData> = parse_data(response.body)?;
            BASE64
                .decode(parsed.data.plaintext)
                .map_err(|e| TransitError::crypto(format!("plaintext is not base64: {e}")))
        } else {
            Err(self.remote_error(&response, key_name, true))
        }
    }

    /// Create the key if absent. Tolerant of benign races: when two callers
    /// race to create the same key, the loser confirms the key exists and
    /// also observes success.
    pub async fn ensure_key_exists(&self, key_name: &str) -> Result<()> {
        if key_name.is_empty() {
            return Err(TransitError::validation("key_name", "must not be empty"));
        }
        if self.read_key(key_name).await? {
            return Ok(());
        }

        let request = ApiRequest::new(Verb::Post, format!("keys/{key_name}"))
            .with_body(to_body(&CreateKeyBody::default())?);
        let created = self.call("create-key", request).await?;
        if is_success(created.status) {
            // Enable deletion up front so erasure can never be blocked later.
            self.enable_deletion(key_name).await?;
            debug!(key = %key_name, "provisioned transit key");
            return Ok(());
        }

        if matches!(created.status, 400 | 409) && self.read_key(key_name).await? {
            debug!(key = %key_name, "lost benign create race");
            return Ok(());
        }
        Err(self.remote_error(&created, key_name, false))
    }

    /// GDPR erasure: delete the subject's key, making every wrapped DEK ever
    /// issued for the subject permanently unwrappable. Fails with
    /// [`TransitError::KeyNotFound`] when no key exists. Terminal.
    pub async fn delete_subject_key(&self, subject_id: &str) -> Result<()> {
        let key_name = self.subject_key_name(subject_id)?;
        if !self.read_key(&key_name).await? {
            return Err(TransitError::KeyNotFound { key_name });
        }

        // Defensive re-enable, covering keys provisioned out-of-band.
        self.enable_deletion(&key_name).await?;

        let request = ApiRequest::new(Verb::Delete, format!("keys/{key_name}"));
        let response = self.call("delete-key", request).await?;
        if is_success(response.status) {
            debug!(key = %key_name, "erased subject key");
            Ok(())
        } else {
            Err(self.remote_error(&response, &key_name, true))
        }
    }

    /// Whether a key is currently provisioned for the subject.
    pub async fn subject_key_exists(&self, subject_id: &str) -> Result<bool> {
        let key_name = self.subject_key_name(subject_id)?;
        self.read_key(&key_name).await
    }

    /// Audit aid: every key under the configured prefix.
    pub async fn list_subject_keys(&self) -> Result<Vec<String>> {
        let response = self.call("list-keys", ApiRequest::new(Verb::List, "keys")).await?;
        match response.status {
            200 => {
                let parsed: SecretResponse<KeyListData> = parse_data(response.body)?;
                Ok(parsed
                    .data
                    .keys
                    .into_iter()
                    .filter(|name| name.starts_with(&self.config.key_prefix))
                    .collect())
            }
            // An empty listing is reported as absent, not as an error.
            404 => Ok(Vec::new()),
            _ => Err(self.remote_error(&response, "", false)),
        }
    }

    /// Rotate the subject's key. Previously issued blobs stay decryptable;
    /// new wraps bind to the new version.
    pub async fn rotate_subject_key(&self, subject_id: &str) -> Result<()> {
        let key_name = self.subject_key_name(subject_id)?;
        let request = ApiRequest::new(Verb::Post, format!("keys/{key_name}/rotate"));
        let response = self.call("rotate-key", request).await?;
        if is_success(response.status) {
            debug!(key = %key_name, "rotated subject key");
            Ok(())
        } else {
            Err(self.remote_error(&response, &key_name, true))
        }
    }

    /// Re-bind a wrapped blob to the newest key version without ever seeing
    /// the plaintext locally.
    pub async fn rewrap(&self, key_name: &str, ciphertext: &str) -> Result<String> {
        if ciphertext.is_empty() {
            return Err(TransitError::validation("ciphertext", "must not be empty"));
        }
        let body = RewrapRequestBody {
            ciphertext: ciphertext.to_string(),
        };
        let request = ApiRequest::new(Verb::Post, format!("rewrap/{key_name}"))
            .with_body(to_body(&body)?);
        let response = self.call("rewrap", request).await?;
        if response.status == 200 {
            let parsed: SecretResponse<CiphertextData> = parse_data(response.body)?;
            Ok(parsed.data.ciphertext)
        } else {
            Err(self.remote_error(&response, key_name, true))
        }
    }

    /// Shut the client down. Idempotent and infallible; subsequent calls
    /// fail with `Validation`. Dropping in-flight operation futures cancels
    /// their retry timers.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("transit client closed");
        }
    }

    fn subject_key_name(&self, subject_id: &str) -> Result<String> {
        if subject_id.trim().is_empty() {
            return Err(TransitError::validation("subject_id", "must not be blank"));
        }
        Ok(self.key_name(subject_id))
    }

    async fn read_key(&self, key_name: &str) -> Result<bool> {
        let request = ApiRequest::new(Verb::Get, format!("keys/{key_name}"));
        let response = self.call("read-key", request).await?;
        match response.status {
            200 => Ok(true),
            404 => Ok(false),
            _ => Err(self.remote_error(&response, key_name, false)),
        }
    }

    async fn enable_deletion(&self, key_name: &str) -> Result<()> {
        let body = KeyConfigBody {
            deletion_allowed: true,
        };
        let request = ApiRequest::new(Verb::Post, format!("keys/{key_name}/config"))
            .with_body(to_body(&body)?);
        let response = self.call("configure-key", request).await?;
        if is_success(response.status) {
            Ok(())
        } else {
            Err(self.remote_error(&response, key_name, true))
        }
    }

    /// Drive one logical RPC through the retry schedule.
    ///
    /// Any HTTP response below 500 returns to the caller for operation-aware
    /// mapping; 5xx, transport failures and per-attempt timeouts are
    /// retryable and consume the budget. Every attempt gets its own
    /// monotonically increasing correlation id.
    async fn call(&self, operation: &'static str, request: ApiRequest) -> Result<ApiResponse> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransitError::validation("client", "is closed"));
        }

        let mut schedule = RetrySchedule::new(self.config.max_retries, self.config.retry_base_backoff);
        loop {
            let request_id = self.request_counter.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(
                request_id,
                operation,
                verb = request.verb.as_str(),
                path = %request.path,
                attempt = schedule.attempt(),
                "transit request"
            );

            let outcome = timeout(self.config.request_timeout, self.transport.execute(&request)).await;
            let failure = match outcome {
                Err(_) => TransitError::connectivity(format!(
                    "request timed out after {:?}",
                    self.config.request_timeout
                )),
                Ok(Err(error)) if error.is_retryable() => error,
                Ok(Err(error)) => return Err(error),
                Ok(Ok(response)) if response.status >= 500 => TransitError::connectivity(format!(
                    "transit service returned status {}",
                    response.status
                )),
                Ok(Ok(response)) => {
                    debug!(request_id, operation, status = response.status, "transit response");
                    return Ok(response);
                }
            };

            match schedule.next_delay() {
                Some(delay) => {
                    warn!(
                        request_id,
                        operation,
                        delay_ms = delay.as_millis() as u64,
                        error = %redact::scrub(&failure.to_string()),
                        "retrying transit request"
                    );
                    sleep(delay).await;
                }
                None => return Err(failure),
            }
        }
    }

    /// Map a terminal non-2xx response onto the taxonomy.
    fn remote_error(
        &self,
        response: &ApiResponse,
        key_name: &str,
        not_found_is_key: bool,
    ) -> TransitError {
        match response.status {
            401 | 403 => TransitError::Authentication {
                status: response.status,
            },
            404 if not_found_is_key => TransitError::KeyNotFound {
                key_name: key_name.to_string(),
            },
            status => {
                let detail = response
                    .body
                    .as_ref()
                    .and_then(|body| serde_json::from_value::<ErrorBody>(body.clone()).ok())
                    .map(|body| body.errors.join("; "))
                    .filter(|detail| !detail.is_empty())
                    .unwrap_or_else(|| "no detail".to_string());
                TransitError::crypto(format!(
                    "transit service rejected the request (status {status}): {}",
                    redact::scrub_with_credential(&detail, &self.config.credential)
                ))
            }
        }
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

fn encode_context(context: &str) -> Option<String> {
    if context.is_empty() {
        None
    } else {
        Some(BASE64.encode(context))
    }
}

fn to_body<T: serde::Serialize>(body: &T) -> Result<serde_json::Value> {
    serde_json::to_value(body).map_err(|e| TransitError::crypto(format!("encoding request: {e}")))
}

fn parse_data<T: DeserializeOwned>(body: Option<serde_json::Value>) -> Result<T> {
    let value = body.ok_or_else(|| TransitError::crypto("empty response body"))?;
    serde_json::from_value(value)
        .map_err(|e| TransitError::crypto(format!("malformed response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InMemoryTransit;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    fn test_config(max_retries: u32) -> TransitConfig {
        TransitConfig::builder()
            .endpoint("http://127.0.0.1:8200")
            .credential("s.test")
            .max_retries(max_retries)
            .retry_base_backoff(Duration::from_millis(1))
            .request_timeout(Duration::from_secs(1))
            .build()
            .unwrap()
    }

    fn test_client(engine: Arc<InMemoryTransit>, max_retries: u32) -> TransitKeyClient {
        TransitKeyClient::with_transport(test_config(max_retries), engine)
    }

    #[test]
    fn key_names_are_deterministic_and_sanitized() {
        let client = test_client(Arc::new(InMemoryTransit::new()), 0);
        assert_eq!(client.key_name("user-42"), "gdpr-user-42");
        assert_eq!(client.key_name("alice@example.com"), "gdpr-alice_example_com");
        assert_eq!(client.key_name("user-42"), client.key_name("user-42"));
    }

    #[tokio::test]
    async fn encrypt_provisions_the_key_lazily() {
        let engine = Arc::new(InMemoryTransit::new());
        let client = test_client(engine.clone(), 0);

        let wrapped = client.encrypt("gdpr-user-42", b"a fresh dek", "ctx").await.unwrap();
        assert!(!wrapped.is_empty());
        assert_eq!(engine.key_names(), vec!["gdpr-user-42"]);

        // Second encrypt reuses the existing key.
        client.encrypt("gdpr-user-42", b"another dek", "ctx").await.unwrap();
        assert_eq!(engine.key_names(), vec!["gdpr-user-42"]);
    }

    #[tokio::test]
    async fn wrap_unwrap_round_trip() {
        let engine = Arc::new(InMemoryTransit::new());
        let client = test_client(engine, 0);

        let wrapped = client.encrypt("gdpr-u1", b"key material", "ctx").await.unwrap();
        let recovered = client.decrypt("gdpr-u1", &wrapped, "ctx").await.unwrap();
        assert_eq!(recovered, b"key material");
    }

    #[tokio::test]
    async fn decrypt_for_missing_key_is_key_not_found() {
        let engine = Arc::new(InMemoryTransit::new());
        let client = test_client(engine, 3);

        let err = client
            .decrypt("gdpr-ghost", "vault:v1:AAAAAAAAAAA=", "ctx")
            .await
            .unwrap_err();
        assert!(matches!(err, TransitError::KeyNotFound { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn retry_budget_is_max_retries_plus_one() {
        let engine = Arc::new(InMemoryTransit::new());
        engine.set_fail_forever(503);
        let client = test_client(engine.clone(), 3);

        let err = client.subject_key_exists("user-42").await.unwrap_err();
        assert!(err.is_retryable(), "{err:?}");
        assert_eq!(engine.request_count(), 4);
    }

    #[tokio::test]
    async fn fatal_auth_failure_is_not_retried() {
        let engine = Arc::new(InMemoryTransit::new());
        engine.push_status_failures(401, 1);
        let client = test_client(engine.clone(), 5);

        let err = client.subject_key_exists("user-42").await.unwrap_err();
        assert!(matches!(err, TransitError::Authentication { status: 401 }), "{err:?}");
        assert_eq!(engine.request_count(), 1);
    }

    #[tokio::test]
    async fn transport_failures_are_retried_until_success() {
        let engine = Arc::new(InMemoryTransit::new());
        engine.seed_key("gdpr-user-42");
        engine.push_transport_failures(2);
        let client = test_client(engine.clone(), 3);

        assert!(client.subject_key_exists("user-42").await.unwrap());
        assert_eq!(engine.request_count(), 3);
    }

    struct SlowTransport {
        attempts: AtomicU64,
    }

    #[async_trait]
    impl TransitTransport for SlowTransport {
        async fn execute(&self, _request: &ApiRequest) -> crate::error::Result<ApiResponse> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_millis(250)).await;
            Ok(ApiResponse {
                status: 200,
                body: None,
            })
        }
    }

    #[tokio::test]
    async fn per_attempt_timeout_counts_against_the_budget() {
        let transport = Arc::new(SlowTransport {
            attempts: AtomicU64::new(0),
        });
        let config = TransitConfig::builder()
            .endpoint("http://127.0.0.1:8200")
            .credential("s.test")
            .max_retries(1)
            .retry_base_backoff(Duration::from_millis(1))
            .request_timeout(Duration::from_millis(10))
            .build()
            .unwrap();
        let client = TransitKeyClient::with_transport(config, transport.clone());

        let err = client.subject_key_exists("user-42").await.unwrap_err();
        assert!(matches!(err, TransitError::Connectivity { .. }), "{err:?}");
        assert!(err.to_string().contains("timed out"));
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);
    }

    /// Transport that replays a fixed response script, for pinning exact
    /// request sequences.
    struct ScriptedTransport {
        script: Mutex<VecDeque<ApiResponse>>,
    }

    #[async_trait]
    impl TransitTransport for ScriptedTransport {
        async fn execute(&self, _request: &ApiRequest) -> crate::error::Result<ApiResponse> {
            Ok(self
                .script
                .lock()
                .pop_front()
                .unwrap_or(ApiResponse {
                    status: 500,
                    body: None,
                }))
        }
    }

    #[tokio::test]
    async fn create_race_loser_observes_success() {
        // GET 404 (absent) → POST create 400 (other writer won) → GET 200.
        let transport = Arc::new(ScriptedTransport {
            script: Mutex::new(VecDeque::from(vec![
                ApiResponse {
                    status: 404,
                    body: None,
                },
                ApiResponse {
                    status: 400,
                    body: Some(serde_json::json!({ "errors": ["key already exists"] })),
                },
                ApiResponse {
                    status: 200,
                    body: None,
                },
            ])),
        });
        let client = TransitKeyClient::with_transport(test_config(0), transport);
        client.ensure_key_exists("gdpr-raced").await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_provisioning_is_idempotent() {
        let engine = Arc::new(InMemoryTransit::new());
        let client = Arc::new(test_client(engine.clone(), 0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client.ensure_key_exists("gdpr-shared").await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(engine.key_names(), vec!["gdpr-shared"]);
    }

    #[tokio::test]
    async fn delete_missing_subject_key_is_key_not_found() {
        let engine = Arc::new(InMemoryTransit::new());
        let client = test_client(engine, 0);

        let err = client.delete_subject_key("nobody").await.unwrap_err();
        assert!(matches!(err, TransitError::KeyNotFound { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn erasure_is_terminal() {
        let engine = Arc::new(InMemoryTransit::new());
        let client = test_client(engine, 0);

        let key_name = client.key_name("user-42");
        let wrapped = client.encrypt(&key_name, b"dek", "ctx").await.unwrap();

        client.delete_subject_key("user-42").await.unwrap();
        assert!(!client.subject_key_exists("user-42").await.unwrap());

        let err = client.decrypt(&key_name, &wrapped, "ctx").await.unwrap_err();
        assert!(matches!(err, TransitError::KeyNotFound { .. }), "{err:?}");

        let err = client.delete_subject_key("user-42").await.unwrap_err();
        assert!(matches!(err, TransitError::KeyNotFound { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn listing_filters_to_the_managed_prefix() {
        let engine = Arc::new(InMemoryTransit::new());
        engine.seed_key("gdpr-a");
        engine.seed_key("gdpr-b");
        engine.seed_key("other-c");
        let client = test_client(engine, 0);

        assert_eq!(client.list_subject_keys().await.unwrap(), vec!["gdpr-a", "gdpr-b"]);
    }

    #[tokio::test]
    async fn empty_listing_is_an_empty_vec() {
        let engine = Arc::new(InMemoryTransit::new());
        let client = test_client(engine, 0);
        assert!(client.list_subject_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rotation_keeps_old_wraps_decryptable() {
        let engine = Arc::new(InMemoryTransit::new());
        let client = test_client(engine, 0);

        let key_name = client.key_name("user-42");
        let old_wrap = client.encrypt(&key_name, b"dek", "ctx").await.unwrap();

        client.rotate_subject_key("user-42").await.unwrap();

        let new_wrap = client.encrypt(&key_name, b"dek2", "ctx").await.unwrap();
        assert!(new_wrap.starts_with("vault:v2:"));
        assert_eq!(client.decrypt(&key_name, &old_wrap, "ctx").await.unwrap(), b"dek");
    }

    #[tokio::test]
    async fn rewrap_rebinds_to_the_newest_version() {
        let engine = Arc::new(InMemoryTransit::new());
        let client = test_client(engine, 0);

        let key_name = client.key_name("user-42");
        let old_wrap = client.encrypt(&key_name, b"dek", "ctx").await.unwrap();
        client.rotate_subject_key("user-42").await.unwrap();

        let rewrapped = client.rewrap(&key_name, &old_wrap).await.unwrap();
        assert!(rewrapped.starts_with("vault:v2:"));
        assert_eq!(client.decrypt(&key_name, &rewrapped, "ctx").await.unwrap(), b"dek");
    }

    #[tokio::test]
    async fn blank_subject_is_rejected_before_any_rpc() {
        let engine = Arc::new(InMemoryTransit::new());
        let client = test_client(engine.clone(), 0);

        for subject in ["", "   "] {
            let err = client.subject_key_exists(subject).await.unwrap_err();
            assert!(matches!(err, TransitError::Validation { .. }), "{err:?}");
        }
        assert_eq!(engine.request_count(), 0);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_fails_later_calls() {
        let engine = Arc::new(InMemoryTransit::new());
        let client = test_client(engine, 0);

        client.close();
        client.close();

        let err = client.subject_key_exists("user-42").await.unwrap_err();
        assert!(matches!(err, TransitError::Validation { .. }), "{err:?}");
    }
}

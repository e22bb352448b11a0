//! Client configuration.
//!
//! Built through a validating builder: an invalid configuration can never be
//! observed, because `build()` fails fast with a message naming the
//! offending field. The built value is immutable and shared read-only.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{Result, TransitError};

/// Lower bound for both timeouts.
pub const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Upper bound for the per-connection timeout (5 minutes).
pub const MAX_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Upper bound for the per-attempt request timeout (10 minutes).
pub const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Validated connection/retry/timeout settings for the transit client.
#[derive(Clone, Serialize, Deserialize)]
pub struct TransitConfig {
    /// Base URL of the transit service, `http://` or `https://`.
    pub endpoint: String,
    /// Credential sent as a request header on every call. Never logged.
    pub credential: String,
    /// Mount path of the transit engine on the remote service.
    pub mount_path: String,
    /// Prefix for every managed key name, `[A-Za-z0-9_-]+`.
    pub key_prefix: String,
    /// TCP connect timeout.
    pub connection_timeout: Duration,
    /// Per-attempt deadline; an elapsed attempt counts against the retry
    /// budget as one failed attempt.
    pub request_timeout: Duration,
    /// Maximum retries after the first attempt (total attempts = retries + 1).
    pub max_retries: u32,
    /// Backoff before the first retry; doubles per attempt, capped and
    /// jittered by the retry schedule.
    pub retry_base_backoff: Duration,
}

impl TransitConfig {
    pub fn builder() -> TransitConfigBuilder {
        TransitConfigBuilder::default()
    }
}

// Hand-written so an accidental `{:?}` of the config never prints the
// credential.
impl fmt::Debug for TransitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitConfig")
            .field("endpoint", &self.endpoint)
            .field("credential", &"***")
            .field("mount_path", &self.mount_path)
            .field("key_prefix", &self.key_prefix)
            .field("connection_timeout", &self.connection_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_base_backoff", &self.retry_base_backoff)
            .finish()
    }
}

/// Builder for [`TransitConfig`]. `endpoint` and `credential` are required;
/// everything else has a production-reasonable default.
#[derive(Debug, Clone)]
pub struct TransitConfigBuilder {
    endpoint: Option<String>,
    credential: Option<String>,
    mount_path: String,
    key_prefix: String,
    connection_timeout: Duration,
    request_timeout: Duration,
    max_retries: u32,
    retry_base_backoff: Duration,
}

impl Default for TransitConfigBuilder {
    fn default() -> Self {
        Self {
            endpoint: None,
            credential: None,
            mount_path: "transit".into(),
            key_prefix: "gdpr-".into(),
            connection_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_backoff: Duration::from_millis(100),
        }
    }
}

impl TransitConfigBuilder {
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn mount_path(mut self, mount_path: impl Into<String>) -> Self {
        self.mount_path = mount_path.into();
        self
    }

    pub fn key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retry_base_backoff(mut self, backoff: Duration) -> Self {
        self.retry_base_backoff = backoff;
        self
    }

    /// Validate every field and produce the immutable configuration.
    pub fn build(self) -> Result<TransitConfig> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| TransitError::validation("endpoint", "is required"))?;
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(TransitError::validation(
                "endpoint",
                "must start with http:// or https://",
            ));
        }
        let endpoint = endpoint.trim_end_matches('/').to_string();

        let credential = self
            .credential
            .ok_or_else(|| TransitError::validation("credential", "is required"))?;
        if credential.is_empty() {
            return Err(TransitError::validation("credential", "must not be blank"));
        }
        if credential.trim() != credential {
            return Err(TransitError::validation(
                "credential",
                "must not have surrounding whitespace",
            ));
        }

        if self.mount_path.trim().is_empty() {
            return Err(TransitError::validation("mount_path", "must not be blank"));
        }
        let mount_path = self.mount_path.trim_matches('/').to_string();
        if mount_path.is_empty() {
            return Err(TransitError::validation("mount_path", "must not be blank"));
        }

        if self.key_prefix.is_empty()
            || !self
                .key_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(TransitError::validation(
                "key_prefix",
                "must match [A-Za-z0-9_-]+",
            ));
        }

        if self.connection_timeout < MIN_TIMEOUT || self.connection_timeout > MAX_CONNECTION_TIMEOUT
        {
            return Err(TransitError::validation(
                "connection_timeout",
                "must be between 1ms and 5 minutes",
            ));
        }
        if self.request_timeout < MIN_TIMEOUT || self.request_timeout > MAX_REQUEST_TIMEOUT {
            return Err(TransitError::validation(
                "request_timeout",
                "must be between 1ms and 10 minutes",
            ));
        }

        Ok(TransitConfig {
            endpoint,
            credential,
            mount_path,
            key_prefix: self.key_prefix,
            connection_timeout: self.connection_timeout,
            request_timeout: self.request_timeout,
            max_retries: self.max_retries,
            retry_base_backoff: self.retry_base_backoff,
        })
    }
}

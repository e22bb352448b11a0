//! Transport seam between the client and the remote service.
//!
//! The client speaks [`TransitTransport`]; production uses the
//! reqwest-backed [`HttpTransport`] (shared connection pool), tests use the
//! in-memory engine. A transport returns `Ok` for *any* HTTP response,
//! success or not; only failures below HTTP (connect, TLS, reset) are
//! `Err`, and those are always retryable `Connectivity` errors.

use async_trait::async_trait;
use reqwest::Method;

use crate::config::TransitConfig;
use crate::error::{Result, TransitError};
use crate::redact;

/// Verb subset the transit API uses. `List` is the non-standard LIST method
/// key enumeration requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Delete,
    List,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Delete => "DELETE",
            Verb::List => "LIST",
        }
    }
}

/// One RPC to the transit service, path relative to `{endpoint}/v1/{mount}/`.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub verb: Verb,
    pub path: String,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(verb: Verb, path: impl Into<String>) -> Self {
        Self {
            verb,
            path: path.into(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Status and parsed JSON body of a response. `body` is `None` when the
/// response had no body or the body was not JSON.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Option<serde_json::Value>,
}

#[async_trait]
pub trait TransitTransport: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse>;
}

/// reqwest-backed transport. One instance owns one connection pool; the
/// credential travels as the `X-Vault-Token` header on every call.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    credential: String,
}

impl HttpTransport {
    pub fn new(config: &TransitConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connection_timeout)
            .build()
            .map_err(|e| TransitError::connectivity(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: format!("{}/v1/{}", config.endpoint, config.mount_path),
            credential: config.credential.clone(),
        })
    }

    fn method(verb: Verb) -> Result<Method> {
        Ok(match verb {
            Verb::Get => Method::GET,
            Verb::Post => Method::POST,
            Verb::Delete => Method::DELETE,
            Verb::List => Method::from_bytes(b"LIST")
                .map_err(|e| TransitError::connectivity(format!("LIST method: {e}")))?,
        })
    }
}

#[async_trait]
impl TransitTransport for HttpTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let url = format!("{}/{}", self.base_url, request.path);
        let mut builder = self
            .http
            .request(Self::method(request.verb)?, url)
            .header("X-Vault-Token", &self.credential);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            TransitError::connectivity(redact::scrub_with_credential(
                &e.to_string(),
                &self.credential,
            ))
        })?;

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(text) if !text.is_empty() => serde_json::from_str(&text).ok(),
            _ => None,
        };
        Ok(ApiResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_attaches_body() {
        let request = ApiRequest::new(Verb::Post, "encrypt/gdpr-user-42")
            .with_body(serde_json::json!({"plaintext": "cGxhaW4="}));
        assert_eq!(request.verb, Verb::Post);
        assert_eq!(request.path, "encrypt/gdpr-user-42");
        assert!(request.body.is_some());
    }

    #[test]
    fn verbs_render_for_logging() {
        assert_eq!(Verb::List.as_str(), "LIST");
        assert_eq!(Verb::Delete.as_str(), "DELETE");
    }
}

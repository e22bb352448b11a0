//! Async client for a remote transit key-wrap service: per-subject key
//! naming, lazy idempotent provisioning, wrap/unwrap, rotation, and GDPR
//! erasure, with retries, redacted logging and a single error taxonomy.

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod key_name;
pub mod redact;
pub mod retry;
pub mod transport;
pub mod wire;

pub use client::TransitKeyClient;
pub use config::{TransitConfig, TransitConfigBuilder};
pub use engine::InMemoryTransit;
pub use error::{Result, TransitError};
pub use key_name::{key_name, sanitize_subject};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, TransitTransport, Verb};

use thiserror::Error;

/// Result alias used across the transit client and the materials providers.
pub type Result<T> = std::result::Result<T, TransitError>;

/// Error taxonomy for the envelope-encryption subsystem.
///
/// Exactly one terminal kind reaches the caller per logical operation, so
/// that an erased key (expected GDPR state) can be handled differently from
/// an infrastructure failure (operational alert). `Connectivity` is the only
/// retryable kind; retries happen inside the client and are invisible to
/// callers except as latency.
#[derive(Debug, Error)]
pub enum TransitError {
    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("Authentication rejected by transit service (status {status})")]
    Authentication { status: u16 },

    #[error("Transit service unreachable: {reason}")]
    Connectivity { reason: String },

    #[error("Transit key not found: {key_name}")]
    KeyNotFound { key_name: String },

    #[error("Invalid encryption context: {reason}")]
    InvalidContext { reason: String },

    #[error("Crypto failure: {reason}")]
    Crypto { reason: String },
}

impl TransitError {
    /// Whether the retry loop may schedule another attempt for this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransitError::Connectivity { .. })
    }

    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        TransitError::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn connectivity(reason: impl Into<String>) -> Self {
        TransitError::Connectivity {
            reason: reason.into(),
        }
    }

    pub(crate) fn crypto(reason: impl Into<String>) -> Self {
        TransitError::Crypto {
            reason: reason.into(),
        }
    }
}

//! Encryption context.
//!
//! A context string binds a wrapped DEK to the subject it was issued for,
//! the creation instant and the provider version:
//! `v=<version>&created=<rfc3339>&subjectId=<id>`. The subject field comes
//! last so subject ids may contain any character, including `&` and `=`.
//!
//! The context travels with the wrapped key and is validated strictly before
//! unwrapping: a mismatched subject, malformed timestamp or empty version
//! fails with `InvalidContext` and no RPC is issued.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use cryptoshred_transit::error::{Result, TransitError};

/// Version tag stamped into every context this provider generation emits.
pub const PROVIDER_VERSION: &str = "1";

/// Parsed form of a context string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionContext {
    pub subject_id: String,
    pub created_at: DateTime<Utc>,
    pub version: String,
}

impl EncryptionContext {
    /// Fresh context for a subject, stamped with now and the current
    /// provider version.
    pub fn for_subject(subject_id: &str) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            created_at: Utc::now(),
            version: PROVIDER_VERSION.to_string(),
        }
    }

    /// Render the wire form, `v=…&created=…&subjectId=…`.
    pub fn encode(&self) -> String {
        format!(
            "v={}&created={}&subjectId={}",
            self.version,
            self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.subject_id
        )
    }

    /// Parse a wire-form context. Strict: every field must be present, the
    /// version non-empty and the timestamp valid RFC 3339.
    pub fn parse(raw: &str) -> Result<Self> {
        let rest = raw
            .strip_prefix("v=")
            .ok_or_else(|| invalid("missing version field"))?;
        let (version, rest) = rest
            .split_once("&created=")
            .ok_or_else(|| invalid("missing created field"))?;
        if version.is_empty() {
            return Err(invalid("empty version field"));
        }
        let (created, subject_id) = rest
            .split_once("&subjectId=")
            .ok_or_else(|| invalid("missing subjectId field"))?;
        let created_at = DateTime::parse_from_rfc3339(created)
            .map_err(|e| invalid(format!("malformed created timestamp: {e}")))?
            .with_timezone(&Utc);
        if subject_id.is_empty() {
            return Err(invalid("empty subjectId field"));
        }
        Ok(Self {
            subject_id: subject_id.to_string(),
            created_at,
            version: version.to_string(),
        })
    }

    /// Reject a context issued for a different subject.
    pub fn validate_for(&self, subject_id: &str) -> Result<()> {
        if self.subject_id != subject_id {
            return Err(invalid(format!(
                "context was issued for a different subject than {subject_id:?}"
            )));
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> TransitError {
    TransitError::InvalidContext {
        reason: reason.into(),
    }
}

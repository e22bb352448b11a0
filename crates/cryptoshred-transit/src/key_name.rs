//! Deterministic subject-to-key-name mapping.
//!
//! A subject maps to exactly one remote key: `<prefix><sanitized subject>`,
//! where every byte outside `[A-Za-z0-9_-]` is replaced with `_`. The prefix
//! itself is validated at configuration time, so the result always matches
//! `[A-Za-z0-9_-]+`.

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_subject(subject: &str) -> String {
    subject
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Derive the remote key name for a subject. Pure and deterministic.
pub fn key_name(prefix: &str, subject: &str) -> String {
    format!("{}{}", prefix, sanitize_subject(subject))
}

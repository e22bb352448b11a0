//! Log redaction.
//!
//! Every free-text fragment that may carry secrets (transport errors, remote
//! error bodies) passes through [`scrub`] before it reaches a log line or an
//! error message. Masks `token=`/`key=`/`secret=`/`password=`-shaped
//! substrings and base64 runs long enough to be key material or payload.

use regex::Regex;
use std::sync::OnceLock;

/// Base64 runs at or above this length are masked. Shorter runs (key names,
/// short ids) stay readable.
pub const BASE64_REDACTION_THRESHOLD: usize = 44;

const MASK: &str = "***";

fn secret_pair_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\b(token|key|secret|password)=([^&\s"']+)"#)
            .expect("secret pair pattern is valid")
    })
}

fn base64_run_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(r"[A-Za-z0-9+/]{{{BASE64_REDACTION_THRESHOLD},}}={{0,2}}");
        Regex::new(&pattern).expect("base64 run pattern is valid")
    })
}

/// Mask secret-shaped substrings and over-threshold base64 runs.
pub fn scrub(text: &str) -> String {
    let masked = secret_pair_pattern().replace_all(text, format!("$1={MASK}"));
    base64_run_pattern().replace_all(&masked, MASK).into_owned()
}

/// [`scrub`], plus an exact-match mask of the configured credential.
///
/// The credential is masked first so it never survives, whatever its shape.
pub fn scrub_with_credential(text: &str, credential: &str) -> String {
    let masked = if credential.is_empty() {
        text.to_string()
    } else {
        text.replace(credential, MASK)
    };
    scrub(&masked)
}

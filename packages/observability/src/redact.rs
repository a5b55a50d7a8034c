//! Credential redaction for log fields.

use serde_json::{Map, Value};

/// Replacement written in place of a sensitive value.
pub const REDACTED: &str = "[REDACTED]";

const DENYLIST_KEYS: &[&str] = &[
    "token",
    "authorization",
    "cookie",
    "secret",
    "password",
    "code_verifier",
    "verifier",
];

/// Returns true if a field name should never be logged verbatim.
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    DENYLIST_KEYS.iter().any(|entry| lower.contains(entry))
}

/// Redact a field value by key and by shape.
pub fn sanitize_value(key: &str, value: &Value) -> Value {
    if is_sensitive_key(key) {
        return Value::String(REDACTED.to_string());
    }

    match value {
        Value::String(s) if looks_like_credential(s) => Value::String(REDACTED.to_string()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), sanitize_value(k, v));
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| sanitize_value(key, item)).collect())
        }
        _ => value.clone(),
    }
}

fn looks_like_credential(raw: &str) -> bool {
    if raw.to_ascii_lowercase().starts_with("bearer ") {
        return true;
    }
    // Compact JWS: header.payload.signature
    raw.matches('.').count() == 2 && raw.len() > 40 && !raw.contains(char::is_whitespace)
}

use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 signature of a request's semantic content (method, path, canonical body).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(method: &Method, path: &str, body: &[u8]) -> Self {
        let mut hasher = Sha256::new();

        hasher.update(method.as_str().to_ascii_uppercase().as_bytes());
        hasher.update(b"\n");
        hasher.update(normalize_path(path).as_bytes());
        hasher.update(b"\n");
        hasher.update(canonical_body(body));

        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// Canonical form of a request body.
///
/// JSON documents are re-serialized with object keys sorted and no
/// insignificant whitespace. Anything else is hashed as its trimmed bytes.
pub fn canonical_body(body: &[u8]) -> Vec<u8> {
    let trimmed = body.trim_ascii();
    if trimmed.is_empty() {
        return Vec::new();
    }

    match serde_json::from_slice::<Value>(trimmed) {
        Ok(value) => {
            let mut out = String::with_capacity(trimmed.len());
            write_canonical(&value, &mut out);
            out.into_bytes()
        }
        Err(_) => trimmed.to_vec(),
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

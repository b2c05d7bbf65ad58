//! # Fixity Hashing
//!
//! Content-addressed SHA-256 digests over a canonical JSON serialization, and
//! the per-stream root hash that folds every record digest into one value.
//!
//! Canonical form: object keys sorted lexicographically at every depth, no
//! insignificant whitespace (`,` and `:` separators), and every non-ASCII
//! character escaped as `\uXXXX`. Key order is enforced here rather than
//! inherited from whatever map type produced the value, so the digest never
//! depends on field iteration order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fmt::Write as _;

/// A lowercase hex SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Wrap an existing hex digest without recomputing it.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Serialize a JSON value into its canonical textual form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(s, out),
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
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 || !c.is_ascii() => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(out, "\\u{:04x}", unit);
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// SHA-256 of raw bytes as a [`ContentHash`].
pub fn sha256_bytes(data: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    ContentHash(format!("{:x}", hasher.finalize()))
}

/// SHA-256 over the canonical serialization of `value`.
pub fn hash_value(value: &Value) -> ContentHash {
    sha256_bytes(canonical_json(value).as_bytes())
}

/// Fold the record digests of one stream into a single root digest.
///
/// Entries are ordered by record identifier (ties broken by digest) before
/// folding, so arrival order never affects the result.
pub fn root_hash(stream: &str, digests: &[(String, ContentHash)]) -> ContentHash {
    let mut ordered: Vec<&(String, ContentHash)> = digests.iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    let entries: Vec<Value> = ordered
        .into_iter()
        .map(|(id, hash)| Value::Array(vec![Value::from(id.as_str()), Value::from(hash.as_str())]))
        .collect();

    hash_value(&serde_json::json!({
        "stream": stream,
        "digests": entries,
    }))
}

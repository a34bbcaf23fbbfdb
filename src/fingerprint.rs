//! Request fingerprint generation.
//!
//! A fingerprint is the SHA-256 digest of a canonical rendering of the
//! request. It is both the cache key and the coalescing key.
//!
//! Conversational requests are always keyed by their session so one
//! conversation never receives another's reply. Price-sensitive requests
//! get their own key space so they only ever read entries written under the
//! shorter price-sensitive TTL.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::types::{AgentRequest, BackendVariant};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestFingerprint {
    pub hash: String,
}

impl RequestFingerprint {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }
    pub fn as_str(&self) -> &str {
        &self.hash
    }
    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .hash
            .char_indices()
            .nth(12)
            .map(|(i, _)| i)
            .unwrap_or(self.hash.len());
        &self.hash[..end]
    }
}

impl std::fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

impl From<&str> for RequestFingerprint {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
impl From<String> for RequestFingerprint {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Collapse whitespace runs, trim and lowercase.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Canonical form of a parameter value: objects become key-sorted maps,
/// `null` members are dropped, strings are trimmed.
pub fn normalize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => normalize_params(map),
        Value::Array(items) => Value::Array(items.iter().map(normalize_value).collect()),
        Value::String(s) => Value::String(s.trim().to_string()),
        other => other.clone(),
    }
}

fn normalize_params(params: &Map<String, Value>) -> Value {
    let sorted: BTreeMap<&String, Value> = params
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k, normalize_value(v)))
        .collect();
    let mut out = Map::new();
    for (k, v) in sorted {
        out.insert(k.clone(), v);
    }
    Value::Object(out)
}

/// Derives cache and coalescing keys from requests.
#[derive(Debug, Clone)]
pub struct FingerprintGenerator {
    salt: Option<String>,
}

impl FingerprintGenerator {
    pub fn new() -> Self {
        Self { salt: None }
    }
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub fn fingerprint(&self, request: &AgentRequest) -> RequestFingerprint {
        // BTreeMap keeps the outer document key-ordered; serde_json's Map may
        // preserve insertion order depending on features, so every nested
        // object is rebuilt sorted by normalize_params.
        let mut parts: BTreeMap<&str, Value> = BTreeMap::new();
        parts.insert("backend", Value::String(request.backend.as_str().into()));
        parts.insert("query", Value::String(normalize_query(&request.query)));
        parts.insert("params", normalize_params(&request.params));
        if request.backend == BackendVariant::Conversational {
            if let Some(ref sid) = request.session_id {
                parts.insert("session", Value::String(sid.clone()));
            }
        }
        if request.price_sensitive {
            parts.insert("priceSensitive", Value::Bool(true));
        }
        if let Some(ref s) = self.salt {
            parts.insert("salt", Value::String(s.clone()));
        }
        let canonical = serde_json::to_string(&parts).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        RequestFingerprint::new(hash)
    }
}

impl Default for FingerprintGenerator {
    fn default() -> Self {
        Self::new()
    }
}

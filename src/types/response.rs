//! Backend-agnostic response shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::request::BackendVariant;

/// One ranked item pulled out of an agent answer (a product, a price
/// suggestion, a dispute outcome...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredItem {
    pub id: String,
    pub label: String,
    pub score: f64,
}

impl StructuredItem {
    pub fn new(id: impl Into<String>, label: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            score,
        }
    }
}

/// The common result both backend variants produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedAgentResponse {
    pub text: String,
    /// Items in the order the backend returned them.
    #[serde(default)]
    pub structured_items: Vec<StructuredItem>,
    /// Upstream payload as received, for debugging.
    #[serde(default)]
    pub raw: Value,
    pub backend: BackendVariant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl NormalizedAgentResponse {
    pub fn new(backend: BackendVariant, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            structured_items: Vec::new(),
            raw: Value::Null,
            backend,
            session_id: None,
        }
    }

    pub fn with_items(mut self, items: Vec<StructuredItem>) -> Self {
        self.structured_items = items;
        self
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = raw;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

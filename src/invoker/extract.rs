//! Structured item extraction from agent and model text.
//!
//! Agents are prompted to answer with a JSON document listing ranked items.
//! Extraction is best-effort: text without a usable JSON document yields no
//! items, and individual entries lacking an id or label are skipped.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::types::StructuredItem;

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("fenced block pattern is valid")
});

const LIST_KEYS: &[&str] = &["items", "products", "recommendations", "results"];
const ID_KEYS: &[&str] = &["id", "sku", "productId", "product_id"];
const LABEL_KEYS: &[&str] = &["label", "name", "title"];
const SCORE_KEYS: &[&str] = &["score", "confidence", "relevance"];

/// Pull the ordered item list out of free text.
pub fn extract_items(text: &str) -> Vec<StructuredItem> {
    match find_json(text) {
        Some(doc) => items_from_value(&doc),
        None => Vec::new(),
    }
}

fn find_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        if v.is_object() || v.is_array() {
            return Some(v);
        }
    }
    for cap in FENCED_JSON.captures_iter(text) {
        if let Some(body) = cap.get(1) {
            if let Ok(v) = serde_json::from_str::<Value>(body.as_str().trim()) {
                return Some(v);
            }
        }
    }
    // Prose wrapped around a single object.
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

fn items_from_value(doc: &Value) -> Vec<StructuredItem> {
    let list = match doc {
        Value::Array(items) => items,
        Value::Object(map) => match LIST_KEYS
            .iter()
            .find_map(|k| map.get(*k).and_then(|v| v.as_array()))
        {
            Some(items) => items,
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    list.iter()
        .enumerate()
        .filter_map(|(idx, item)| {
            let parsed = item_from_value(item);
            if parsed.is_none() {
                debug!(index = idx, "skipping item without id or label");
            }
            parsed
        })
        .collect()
}

fn item_from_value(item: &Value) -> Option<StructuredItem> {
    let obj = item.as_object()?;
    let id = ID_KEYS.iter().find_map(|k| match obj.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })?;
    let label = LABEL_KEYS
        .iter()
        .find_map(|k| obj.get(*k)?.as_str().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())?;
    let score = SCORE_KEYS
        .iter()
        .find_map(|k| match obj.get(*k)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|s| s.is_finite())
        .unwrap_or(0.0);
    Some(StructuredItem { id, label, score })
}

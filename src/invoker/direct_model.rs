//! Direct model invoker.
//!
//! Single-shot, stateless completion against a model endpoint using the
//! messages request shape:
//! - The prompt is composed from the query plus the sorted preference set.
//! - `temperature` and `max_tokens` params override configured defaults and
//!   are not repeated in the prompt.
//! - The answer is the concatenation of the `text` content blocks.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use super::extract::extract_items;
use super::{AgentInvoker, UpstreamCall};
use crate::fingerprint::normalize_value;
use crate::transport::{HttpTransport, TransportConfig};
use crate::types::{AgentRequest, BackendVariant, NormalizedAgentResponse};
use crate::{Error, Result};

const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

const GENERATION_KEYS: &[&str] = &["temperature", "max_tokens", "maxTokens"];

#[derive(Debug, Clone)]
pub struct DirectModelConfig {
    pub base_url: String,
    pub model_id: String,
    pub timeout: Duration,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub system_prompt: Option<String>,
    pub anthropic_version: String,
}

impl DirectModelConfig {
    pub fn new(base_url: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model_id: model_id.into(),
            timeout: Duration::from_secs(20),
            api_key: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.7,
            system_prompt: None,
            anthropic_version: DEFAULT_ANTHROPIC_VERSION.to_string(),
        }
    }
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// Stateless model endpoint.
#[derive(Debug)]
pub struct DirectModelInvoker {
    config: DirectModelConfig,
    transport: HttpTransport,
}

impl DirectModelInvoker {
    pub fn new(config: DirectModelConfig) -> Result<Self> {
        let mut tc = TransportConfig::new(config.base_url.clone()).with_timeout(config.timeout);
        if let Some(ref key) = config.api_key {
            tc = tc.with_api_key(key.clone());
        }
        let transport = HttpTransport::new(tc)?;
        Ok(Self { config, transport })
    }

    /// Query followed by a `Preferences:` block listing non-generation params
    /// in key order.
    ///
    /// Params are rendered in their fingerprint-normalized form, so every
    /// request sharing a fingerprint sends the same prompt.
    pub fn compose_prompt(request: &AgentRequest) -> String {
        let prefs: BTreeMap<&String, Value> = request
            .params
            .iter()
            .filter(|(k, v)| !v.is_null() && !GENERATION_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k, normalize_value(v)))
            .collect();
        let mut prompt = request.query.trim().to_string();
        if !prefs.is_empty() {
            prompt.push_str("\n\nPreferences:");
            for (k, v) in prefs {
                let rendered = match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                prompt.push_str(&format!("\n- {}: {}", k, rendered));
            }
        }
        prompt
    }

    pub fn build_request(&self, request: &AgentRequest) -> Result<UpstreamCall> {
        let url = self
            .transport
            .endpoint(&["model", self.config.model_id.as_str(), "invoke"])?;

        let temperature = request
            .params
            .get("temperature")
            .and_then(|v| v.as_f64())
            .unwrap_or(self.config.temperature);
        let max_tokens = request
            .params
            .get("max_tokens")
            .or_else(|| request.params.get("maxTokens"))
            .and_then(|v| v.as_u64())
            .map(|v| v.min(u32::MAX as u64) as u32)
            .unwrap_or(self.config.max_tokens);

        let mut body = json!({
            "anthropic_version": self.config.anthropic_version,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "messages": [{
                "role": "user",
                "content": [{ "type": "text", "text": Self::compose_prompt(request) }],
            }],
        });
        if let Some(ref sys) = self.config.system_prompt {
            body["system"] = Value::String(sys.clone());
        }

        Ok(UpstreamCall {
            url,
            body,
            session_id: None,
        })
    }

    /// Parse `{ content: [ { type: "text", text } ], stop_reason }`.
    pub fn parse_response(&self, body: &Value) -> Result<NormalizedAgentResponse> {
        let blocks = body
            .get("content")
            .and_then(|v| v.as_array())
            .ok_or_else(|| Error::parse("model response has no content array"))?;

        let mut text = String::new();
        let mut text_blocks = 0usize;
        for (idx, block) in blocks.iter().enumerate() {
            if block.get("type").and_then(|t| t.as_str()) != Some("text") {
                continue;
            }
            let fragment = block
                .get("text")
                .and_then(|t| t.as_str())
                .ok_or_else(|| Error::parse(format!("content[{}].text missing", idx)))?;
            text.push_str(fragment);
            text_blocks += 1;
        }
        if text_blocks == 0 {
            return Err(Error::parse("model response contained no text blocks"));
        }

        let items = extract_items(&text);
        Ok(NormalizedAgentResponse::new(BackendVariant::DirectModel, text)
            .with_items(items)
            .with_raw(body.clone()))
    }
}

#[async_trait]
impl AgentInvoker for DirectModelInvoker {
    fn variant(&self) -> BackendVariant {
        BackendVariant::DirectModel
    }

    fn timeout(&self) -> Duration {
        self.transport.timeout()
    }

    async fn invoke(&self, request: &AgentRequest) -> Result<NormalizedAgentResponse> {
        let call = self.build_request(request)?;
        let body = self.transport.post_json(call.url, &call.body).await?;
        self.parse_response(&body)
    }
}

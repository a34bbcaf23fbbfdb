//! Conversational agent invoker.
//!
//! Talks to a session-scoped agent runtime. Differences from the direct model
//! invoker:
//! - The URL carries the agent, alias and session identifiers.
//! - Request parameters travel as string-valued prompt session attributes.
//! - The answer arrives as a list of completion chunks whose `bytes` are
//!   base64-encoded UTF-8 fragments that must be concatenated.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::extract::extract_items;
use super::{AgentInvoker, UpstreamCall};
use crate::fingerprint::normalize_value;
use crate::transport::{HttpTransport, TransportConfig};
use crate::types::{AgentRequest, BackendVariant, NormalizedAgentResponse};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct ConversationalConfig {
    pub base_url: String,
    pub agent_id: String,
    pub agent_alias_id: String,
    pub timeout: Duration,
    pub api_key: Option<String>,
    pub enable_trace: bool,
}

impl ConversationalConfig {
    pub fn new(
        base_url: impl Into<String>,
        agent_id: impl Into<String>,
        agent_alias_id: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            agent_id: agent_id.into(),
            agent_alias_id: agent_alias_id.into(),
            timeout: Duration::from_secs(20),
            api_key: None,
            enable_trace: false,
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
}

/// Session-scoped agent endpoint.
#[derive(Debug)]
pub struct ConversationalInvoker {
    config: ConversationalConfig,
    transport: HttpTransport,
}

impl ConversationalInvoker {
    pub fn new(config: ConversationalConfig) -> Result<Self> {
        let mut tc = TransportConfig::new(config.base_url.clone()).with_timeout(config.timeout);
        if let Some(ref key) = config.api_key {
            tc = tc.with_api_key(key.clone());
        }
        let transport = HttpTransport::new(tc)?;
        Ok(Self { config, transport })
    }

    /// Session to use for `request`: the caller's, or a fresh one for a new
    /// conversation so agent memory is never shared by accident.
    pub fn session_for(request: &AgentRequest) -> String {
        request
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    pub fn build_request(&self, request: &AgentRequest) -> Result<UpstreamCall> {
        let session_id = Self::session_for(request);
        let url = self.transport.endpoint(&[
            "agents",
            self.config.agent_id.as_str(),
            "agentAliases",
            self.config.agent_alias_id.as_str(),
            "sessions",
            session_id.as_str(),
            "text",
        ])?;

        let mut attributes = Map::new();
        for (k, v) in &request.params {
            let s = match normalize_value(v) {
                Value::Null => continue,
                Value::String(s) => s,
                other => other.to_string(),
            };
            attributes.insert(k.clone(), Value::String(s));
        }

        let body = json!({
            "inputText": request.query,
            "enableTrace": self.config.enable_trace,
            "sessionState": {
                "promptSessionAttributes": attributes,
            },
        });

        Ok(UpstreamCall {
            url,
            body,
            session_id: Some(session_id),
        })
    }

    /// Parse `{ completion: [ { chunk: { bytes } } ... ] }`.
    pub fn parse_response(&self, body: &Value, session_id: Option<&str>) -> Result<NormalizedAgentResponse> {
        let events = body
            .get("completion")
            .and_then(|v| v.as_array())
            .ok_or_else(|| Error::parse("agent response has no completion array"))?;

        let mut text = String::new();
        let mut chunks = 0usize;
        for (idx, event) in events.iter().enumerate() {
            // Trace and other non-chunk events are skipped.
            let Some(chunk) = event.get("chunk") else {
                continue;
            };
            let encoded = chunk
                .get("bytes")
                .and_then(|b| b.as_str())
                .ok_or_else(|| Error::parse(format!("completion[{}].chunk.bytes missing", idx)))?;
            let decoded = STANDARD.decode(encoded).map_err(|e| {
                Error::parse(format!("completion[{}].chunk.bytes is not base64: {}", idx, e))
            })?;
            let fragment = String::from_utf8(decoded).map_err(|e| {
                Error::parse(format!("completion[{}].chunk.bytes is not UTF-8: {}", idx, e))
            })?;
            text.push_str(&fragment);
            chunks += 1;
        }
        if chunks == 0 {
            return Err(Error::parse("agent response contained no completion chunks"));
        }
        debug!(chunks, "decoded agent completion");

        let session = body
            .get("sessionId")
            .and_then(|v| v.as_str())
            .or(session_id);
        let items = extract_items(&text);
        let mut response = NormalizedAgentResponse::new(BackendVariant::Conversational, text)
            .with_items(items)
            .with_raw(body.clone());
        if let Some(sid) = session {
            response = response.with_session(sid);
        }
        Ok(response)
    }
}

#[async_trait]
impl AgentInvoker for ConversationalInvoker {
    fn variant(&self) -> BackendVariant {
        BackendVariant::Conversational
    }

    fn timeout(&self) -> Duration {
        self.transport.timeout()
    }

    async fn invoke(&self, request: &AgentRequest) -> Result<NormalizedAgentResponse> {
        let call = self.build_request(request)?;
        let body = self.transport.post_json(call.url, &call.body).await?;
        self.parse_response(&body, call.session_id.as_deref())
    }
}

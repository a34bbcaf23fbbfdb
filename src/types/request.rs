//! Gateway request format.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, ErrorContext, Result};

/// Upstream family that serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendVariant {
    /// Session-scoped agent endpoint.
    #[serde(alias = "agent")]
    Conversational,
    /// Stateless single-shot model endpoint.
    #[serde(alias = "model", alias = "directModel")]
    DirectModel,
}

impl BackendVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendVariant::Conversational => "conversational",
            BackendVariant::DirectModel => "direct_model",
        }
    }
}

impl std::fmt::Display for BackendVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single query submitted to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub caller_id: String,
    #[serde(rename = "backendVariant")]
    pub backend: BackendVariant,
    pub query: String,
    /// Preferences / generation parameters. Order-insensitive.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Conversation to continue (conversational backend only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Selects the short cache TTL.
    #[serde(default)]
    pub price_sensitive: bool,
}

impl AgentRequest {
    pub fn new(
        caller_id: impl Into<String>,
        backend: BackendVariant,
        query: impl Into<String>,
    ) -> Self {
        Self {
            caller_id: caller_id.into(),
            backend,
            query: query.into(),
            params: Map::new(),
            session_id: None,
            price_sensitive: false,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn price_sensitive(mut self, flag: bool) -> Self {
        self.price_sensitive = flag;
        self
    }

    /// Reject requests that cannot be routed anywhere.
    pub fn validate(&self) -> Result<()> {
        if self.caller_id.trim().is_empty() {
            return Err(Error::validation_with_context(
                "caller id must not be empty",
                ErrorContext::new()
                    .with_field_path("request.callerId")
                    .with_source("request_validator"),
            ));
        }
        if self.query.trim().is_empty() {
            return Err(Error::validation_with_context(
                "query must not be empty",
                ErrorContext::new()
                    .with_field_path("request.query")
                    .with_source("request_validator"),
            ));
        }
        if let Some(ref sid) = self.session_id {
            if sid.trim().is_empty() {
                return Err(Error::validation_with_context(
                    "session id must not be blank when provided",
                    ErrorContext::new()
                        .with_field_path("request.sessionId")
                        .with_source("request_validator"),
                ));
            }
        }
        Ok(())
    }
}

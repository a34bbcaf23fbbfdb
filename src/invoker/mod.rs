//! 上游调用层：通过 trait 屏蔽会话式代理与直连模型两种后端的协议差异
//!
//! Upstream invoker abstraction. The gateway holds one `Arc<dyn AgentInvoker>`
//! per [`BackendVariant`] and never sees wire formats; each invoker maps an
//! [`AgentRequest`] to its backend's HTTP call and normalizes the reply into a
//! [`NormalizedAgentResponse`].
//!
//! | Invoker | Backend |
//! |---------|---------|
//! | [`ConversationalInvoker`] | Session-based agent runtime, chunked completion |
//! | [`DirectModelInvoker`] | Stateless messages-style model endpoint |
//!
//! Invokers perform exactly one attempt. Retry, caching and coalescing are the
//! gateway's concern.

pub mod conversational;
pub mod direct_model;
pub mod extract;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::types::{AgentRequest, BackendVariant, NormalizedAgentResponse};
use crate::Result;

pub use conversational::{ConversationalConfig, ConversationalInvoker};
pub use direct_model::{DirectModelConfig, DirectModelInvoker};
pub use extract::extract_items;

/// A fully built upstream HTTP call.
#[derive(Debug, Clone)]
pub struct UpstreamCall {
    pub url: Url,
    pub body: Value,
    /// Session the call runs in, for backends that keep one.
    pub session_id: Option<String>,
}

/// One backend variant's request/response adapter.
///
/// Errors must be classified: transport failures as `UpstreamUnavailable`,
/// deadline expiry as `UpstreamTimeout`, throttling as `UpstreamRateLimited`
/// and unexpected payloads as `ResponseParse`.
#[async_trait]
pub trait AgentInvoker: Send + Sync + std::fmt::Debug {
    fn variant(&self) -> BackendVariant;

    /// Per-attempt deadline.
    fn timeout(&self) -> Duration;

    async fn invoke(&self, request: &AgentRequest) -> Result<NormalizedAgentResponse>;
}

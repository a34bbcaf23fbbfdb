//! # agent-gateway
//!
//! 面向多代理 AI 调用的网关：按调用方限流、相同请求合并、响应缓存与统一归一化。
//!
//! Gateway for multi-agent AI invocation. Callers send an [`AgentRequest`]
//! naming a backend variant; the gateway admits it against the caller's token
//! bucket, answers from cache when it can, and otherwise makes a single
//! upstream call per distinct request no matter how many callers ask at once.
//!
//! ## Request Flow
//!
//! 1. **Validate** the request (non-empty caller and query)
//! 2. **Rate check** against the caller's token bucket; deny with a retry hint
//! 3. **Fingerprint** backend, normalized query and normalized parameters
//! 4. **Cache lookup**; a live entry is returned immediately
//! 5. **Coalesced invoke**: the first caller runs the upstream call with the
//!    retry policy, concurrent identical callers wait for its result
//! 6. **Store** the normalized response with a TTL chosen per request
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agent_gateway::gateway::Gateway;
//! use agent_gateway::invoker::{DirectModelConfig, DirectModelInvoker};
//! use agent_gateway::types::{AgentRequest, BackendVariant};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> agent_gateway::Result<()> {
//!     let invoker = DirectModelInvoker::new(DirectModelConfig::new(
//!         "https://models.internal.example.com",
//!         "anthropic.claude-3-haiku",
//!     ))?;
//!     let gateway = Gateway::builder().invoker(Arc::new(invoker)).build()?;
//!
//!     let reply = gateway
//!         .handle(AgentRequest::new("seller-7", BackendVariant::DirectModel, "price a used tripod"))
//!         .await?;
//!     println!("{} ({:?})", reply.response.text, reply.source);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`gateway`] | Orchestrator, builder, retry policy, statistics |
//! | [`cache`] | Fingerprint-addressed response cache with pluggable backends |
//! | [`resilience`] | Per-caller rate limiter and request coalescer |
//! | [`invoker`] | Conversational agent and direct model upstream adapters |
//! | [`fingerprint`] | Canonical request digests |
//! | [`transport`] | Shared HTTP client |
//! | [`types`] | Request and normalized response types |
//! | [`config`] | YAML configuration with environment overrides |
//! | [`maintenance`] | Periodic cache purge and bucket pruning |
//! | `server` | Axum HTTP API (feature `server`) |

pub mod cache;
pub mod config;
pub mod error_code;
pub mod fingerprint;
pub mod gateway;
pub mod invoker;
pub mod maintenance;
pub mod resilience;
pub mod transport;
pub mod types;

#[cfg(feature = "server")]
pub mod server;

// Re-export main types for convenience
pub use config::GatewayConfig;
pub use error_code::ErrorKind;
pub use fingerprint::{FingerprintGenerator, RequestFingerprint};
pub use gateway::{Gateway, GatewayBuilder, GatewayReply, ReplySource};
pub use invoker::AgentInvoker;
pub use types::{AgentRequest, BackendVariant, NormalizedAgentResponse, StructuredItem};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};

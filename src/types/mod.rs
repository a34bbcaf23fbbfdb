//! 类型系统模块：定义网关请求与归一化响应的核心数据类型。
//!
//! # Types Module
//!
//! Core request/response shapes shared by every gateway component.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`AgentRequest`] | Caller request routed through the gateway |
//! | [`BackendVariant`] | Which upstream family serves the request |
//! | [`NormalizedAgentResponse`] | Backend-agnostic result shape |
//! | [`StructuredItem`] | Ranked item extracted from an agent answer |
//!
//! ## Example
//!
//! ```rust
//! use agent_gateway::types::{AgentRequest, BackendVariant};
//!
//! let request = AgentRequest::new("buyer-42", BackendVariant::DirectModel, "running shoes under $100")
//!     .with_param("category", "footwear")
//!     .price_sensitive(true);
//! assert!(request.validate().is_ok());
//! ```

pub mod request;
pub mod response;

pub use request::{AgentRequest, BackendVariant};
pub use response::{NormalizedAgentResponse, StructuredItem};

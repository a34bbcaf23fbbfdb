//! 网关编排层：限流 → 缓存 → 合并调用（含重试）→ 写缓存。
//!
//! # Gateway Module
//!
//! Per-request state machine:
//!
//! ```text
//! RECEIVED -> RATE_CHECKED -> CACHE_CHECKED -> CACHE_HIT -> DONE
//!                  |                       \-> CACHE_MISS -> INVOKING -> NORMALIZED -> CACHED -> DONE
//!                  \-> FAILED (denied)                          \-> FAILED (retries exhausted)
//! ```
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Gateway`] | Orchestrator; cheap to clone |
//! | [`GatewayBuilder`] | Explicit component injection or construction from config |
//! | [`RetryPolicy`] | Exponential backoff honoring upstream hints |
//! | [`GatewayStats`] | Counter snapshot |
//!
//! Only the coalescing leader invokes the upstream and writes the cache;
//! followers receive the leader's result.

mod builder;
mod core;
mod policy;
mod stats;

pub use self::builder::GatewayBuilder;
pub use self::core::{Gateway, GatewayReply, ReplySource};
pub use self::policy::{Decision, RetryPolicy};
pub use self::stats::GatewayStats;

//! 弹性模式模块：提供按调用方限流与相同请求合并等保护机制。
//!
//! # Resilience Primitives Module
//!
//! Admission control and load shedding for upstream AI backends.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_limiter`] | Per-caller token bucket, non-blocking |
//! | [`coalescer`] | At most one in-flight upstream call per request fingerprint |
//!
//! ## Rate Limiter
//!
//! ```rust
//! use agent_gateway::resilience::rate_limiter::{Admission, RateLimiter, RateLimiterConfig};
//!
//! let limiter = RateLimiter::new(
//!     RateLimiterConfig::new()
//!         .with_capacity(5)
//!         .with_refill_rate(1.0), // 1 token per second
//! );
//!
//! match limiter.check_and_consume("buyer-42", 1) {
//!     Admission::Allowed { .. } => { /* proceed */ }
//!     Admission::Denied { retry_after } => println!("retry in {:?}", retry_after),
//! }
//! ```
//!
//! ## Request Coalescer
//!
//! Concurrent callers presenting the same fingerprint share one execution
//! of the producer and all receive its result, success or failure.

pub mod coalescer;
pub mod rate_limiter;

pub use coalescer::RequestCoalescer;
pub use rate_limiter::{Admission, RateLimiter, RateLimiterConfig};

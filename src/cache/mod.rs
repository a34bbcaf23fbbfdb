//! 响应缓存模块：以请求指纹为键缓存 AI 响应，支持过期与可插拔后端。
//!
//! # Response Caching Module
//!
//! Fingerprint-addressed response caching with per-request TTL and pluggable
//! storage backends.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ResponseCache`] | Typed cache over a backend, with TTL policy and statistics |
//! | [`CacheConfig`] | TTLs per backend variant and for price-sensitive queries |
//! | [`CacheEntry`] | Cached response with creation and expiry timestamps |
//! | [`CacheBackend`] | Storage trait (`get` / `set` / `compare_and_insert`) |
//! | [`MemoryCache`] | In-memory backend, optionally bounded (evicts oldest write) |
//! | [`NullCache`] | No-op backend for disabling caching |
//!
//! ## Example
//!
//! ```rust
//! use agent_gateway::cache::{CacheConfig, MemoryCache, ResponseCache};
//!
//! // Keep at most 10k responses in memory
//! let cache = ResponseCache::new(CacheConfig::default(), Box::new(MemoryCache::new(10_000)));
//! assert_eq!(cache.backend_name(), "memory");
//! ```
//!
//! Expired entries are never returned; they are removed lazily on lookup or
//! in bulk by [`ResponseCache::purge_expired`].

mod backend;
mod manager;

pub use backend::{CacheBackend, MemoryCache, NullCache};
pub use manager::{CacheConfig, CacheEntry, CacheStats, ResponseCache};

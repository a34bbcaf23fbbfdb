use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::{Error, ErrorContext, Result};

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub capacity: f64,
    pub refill_per_sec: f64,
    pub tokens: f64,
    /// Estimated wait time until one token is available (ms), if currently empty.
    pub estimated_wait_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub enabled: bool,
    /// Bucket capacity (maximum burst).
    pub capacity: f64,
    /// Tokens added per second.
    pub refill_per_sec: f64,
}

impl RateLimiterConfig {
    pub fn from_rps(rps: f64) -> Option<Self> {
        if !rps.is_finite() || rps <= 0.0 {
            return None;
        }
        Some(Self {
            enabled: true,
            refill_per_sec: rps,
            capacity: rps.max(1.0), // default burst: 1 second worth, at least 1
        })
    }

    /// Create a new config with default values
    pub fn new() -> Self {
        Self {
            enabled: true,
            capacity: 10.0,
            refill_per_sec: 1.0,
        }
    }

    /// A limiter that admits everything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    /// Set the bucket capacity
    pub fn with_capacity(mut self, tokens: u32) -> Self {
        self.capacity = tokens as f64;
        self
    }

    /// Set the refill rate (tokens per second)
    pub fn with_refill_rate(mut self, rate: f64) -> Self {
        self.refill_per_sec = rate;
        self
    }

    /// An enabled limiter needs at least one token of capacity and a finite,
    /// positive refill rate; otherwise a denied caller could never recover.
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if !self.capacity.is_finite() || self.capacity < 1.0 {
            return Err(Error::configuration_with_context(
                format!("capacity must be at least 1, got {}", self.capacity),
                ErrorContext::new()
                    .with_field_path("rate_limit.capacity")
                    .with_source("rate_limiter"),
            ));
        }
        if !self.refill_per_sec.is_finite() || self.refill_per_sec <= 0.0 {
            return Err(Error::configuration_with_context(
                format!("refill rate must be positive, got {}", self.refill_per_sec),
                ErrorContext::new()
                    .with_field_path("rate_limit.refill_per_sec")
                    .with_source("rate_limiter"),
            ));
        }
        Ok(())
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Allowed { remaining: f64 },
    Denied { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

/// Token state for one caller.
#[derive(Debug, Clone)]
pub struct RateBucket {
    pub caller_id: String,
    pub tokens: f64,
    pub last_refill: Instant,
}

/// Per-caller token-bucket admission control.
///
/// - Never sleeps; denied callers get a `retry_after` hint
/// - Buckets are created full on first sight and refilled lazily
/// - Refill and consume happen under the bucket's map shard lock
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    buckets: DashMap<String, RateBucket>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        Self {
            cfg,
            buckets: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.cfg
    }

    fn refill_locked(cfg: &RateLimiterConfig, bucket: &mut RateBucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * cfg.refill_per_sec).min(cfg.capacity);
            bucket.last_refill = now;
        }
    }

    fn wait_for(cfg: &RateLimiterConfig, missing: f64) -> Duration {
        Duration::try_from_secs_f64(missing / cfg.refill_per_sec).unwrap_or(Duration::MAX)
    }

    /// Take `cost` tokens from the caller's bucket if it holds enough.
    pub fn check_and_consume(&self, caller_id: &str, cost: u32) -> Admission {
        let cfg = &self.cfg;
        if !cfg.enabled {
            return Admission::Allowed {
                remaining: cfg.capacity,
            };
        }
        let cost = cost as f64;
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry(caller_id.to_string())
            .or_insert_with(|| RateBucket {
                caller_id: caller_id.to_string(),
                tokens: cfg.capacity,
                last_refill: now,
            });
        Self::refill_locked(cfg, &mut bucket, now);

        if bucket.tokens >= cost {
            bucket.tokens -= cost;
            Admission::Allowed {
                remaining: bucket.tokens,
            }
        } else {
            Admission::Denied {
                retry_after: Self::wait_for(cfg, cost - bucket.tokens),
            }
        }
    }

    pub fn snapshot(&self, caller_id: &str) -> Option<RateLimiterSnapshot> {
        let cfg = &self.cfg;
        let mut bucket = self.buckets.get_mut(caller_id)?;
        Self::refill_locked(cfg, &mut bucket, Instant::now());
        let estimated_wait_ms = if bucket.tokens < 1.0 {
            Some(Self::wait_for(cfg, 1.0 - bucket.tokens).as_millis() as u64)
        } else {
            None
        };
        Some(RateLimiterSnapshot {
            capacity: cfg.capacity,
            refill_per_sec: cfg.refill_per_sec,
            tokens: bucket.tokens,
            estimated_wait_ms,
        })
    }

    /// Remove buckets that would be full and were untouched for `idle_for`.
    ///
    /// A full bucket behaves exactly like a missing one, so this never changes
    /// an admission decision.
    pub fn prune_idle(&self, idle_for: Duration) -> usize {
        let cfg = &self.cfg;
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets.retain(|_, b| {
            let idle = now.saturating_duration_since(b.last_refill);
            let tokens = b.tokens + idle.as_secs_f64() * cfg.refill_per_sec;
            tokens < cfg.capacity || idle < idle_for
        });
        before.saturating_sub(self.buckets.len())
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cache::CacheStats;

/// Point-in-time gateway counters.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStats {
    pub requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub upstream_calls: u64,
    pub retries: u64,
    pub rate_limited: u64,
    pub failures: u64,
    pub cache_store_failures: u64,
    pub in_flight: usize,
    pub rate_buckets: usize,
    pub cache: CacheStats,
}

#[derive(Default)]
pub(crate) struct GatewayCounters {
    pub requests: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub upstream_calls: AtomicU64,
    pub retries: AtomicU64,
    pub rate_limited: AtomicU64,
    pub failures: AtomicU64,
    pub cache_store_failures: AtomicU64,
}

impl GatewayCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GatewayStats {
        GatewayStats {
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            upstream_calls: self.upstream_calls.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cache_store_failures: self.cache_store_failures.load(Ordering::Relaxed),
            ..GatewayStats::default()
        }
    }
}

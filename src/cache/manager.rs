//! Response cache manager.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::debug;

use super::backend::CacheBackend;
use crate::fingerprint::RequestFingerprint;
use crate::types::{AgentRequest, BackendVariant, NormalizedAgentResponse};
use crate::{Error, ErrorContext, Result};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    /// TTL for conversational agent answers.
    pub conversational_ttl: Duration,
    /// TTL for direct model completions.
    pub direct_model_ttl: Duration,
    /// TTL for requests flagged price-sensitive; should be the shortest.
    pub price_sensitive_ttl: Duration,
    pub max_entry_size: usize,
    pub key_prefix: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            conversational_ttl: Duration::from_secs(120),
            direct_model_ttl: Duration::from_secs(600),
            price_sensitive_ttl: Duration::from_secs(30),
            max_entry_size: 1024 * 1024,
            key_prefix: None,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
    pub fn with_ttl(mut self, backend: BackendVariant, ttl: Duration) -> Self {
        match backend {
            BackendVariant::Conversational => self.conversational_ttl = ttl,
            BackendVariant::DirectModel => self.direct_model_ttl = ttl,
        }
        self
    }
    pub fn with_price_sensitive_ttl(mut self, ttl: Duration) -> Self {
        self.price_sensitive_ttl = ttl;
        self
    }
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Staleness budget for a request's answer.
    pub fn ttl_for(&self, request: &AgentRequest) -> Duration {
        let base = match request.backend {
            BackendVariant::Conversational => self.conversational_ttl,
            BackendVariant::DirectModel => self.direct_model_ttl,
        };
        if request.price_sensitive {
            base.min(self.price_sensitive_ttl)
        } else {
            base
        }
    }
}

/// A cached response and its lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: RequestFingerprint,
    pub response: NormalizedAgentResponse,
    pub created_at: SystemTime,
    pub expires_at: SystemTime,
}

impl CacheEntry {
    pub fn new(fingerprint: RequestFingerprint, response: NormalizedAgentResponse, ttl: Duration) -> Self {
        let created_at = SystemTime::now();
        Self {
            fingerprint,
            response,
            created_at,
            expires_at: created_at + ttl,
        }
    }
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}
impl AtomicStats {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }
    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Fingerprint-addressed response store.
pub struct ResponseCache {
    config: CacheConfig,
    backend: Box<dyn CacheBackend>,
    stats: Arc<AtomicStats>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig, backend: Box<dyn CacheBackend>) -> Self {
        Self {
            config,
            backend,
            stats: Arc::new(AtomicStats::new()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a live entry. Expired or undecodable entries count as misses
    /// and are removed.
    pub async fn get(&self, fingerprint: &RequestFingerprint) -> Result<Option<CacheEntry>> {
        if !self.config.enabled {
            return Ok(None);
        }
        let key = self.prefix_key(fingerprint);
        let data = match self.backend.get(&key).await {
            Ok(Some(data)) => data,
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };
        let entry: CacheEntry = match serde_json::from_slice(&data) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(fingerprint = fingerprint.short(), error = %e, "dropping undecodable cache entry");
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                self.backend.delete(&key).await?;
                return Ok(None);
            }
        };
        if entry.is_expired_at(SystemTime::now()) {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            self.backend.delete(&key).await?;
            return Ok(None);
        }
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some(entry))
    }

    pub async fn put(
        &self,
        fingerprint: &RequestFingerprint,
        response: &NormalizedAgentResponse,
        ttl: Duration,
    ) -> Result<()> {
        let Some((key, data)) = self.encode(fingerprint, response, ttl)? else {
            return Ok(());
        };
        match self.backend.set(&key, &data, ttl).await {
            Ok(()) => {
                self.stats.sets.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Store only if no live entry exists. Returns whether this call wrote.
    pub async fn insert_if_absent(
        &self,
        fingerprint: &RequestFingerprint,
        response: &NormalizedAgentResponse,
        ttl: Duration,
    ) -> Result<bool> {
        let Some((key, data)) = self.encode(fingerprint, response, ttl)? else {
            return Ok(false);
        };
        let written = self.backend.compare_and_insert(&key, &data, ttl).await?;
        if written {
            self.stats.sets.fetch_add(1, Ordering::Relaxed);
        }
        Ok(written)
    }

    pub async fn invalidate(&self, fingerprint: &RequestFingerprint) -> Result<bool> {
        if !self.config.enabled {
            return Ok(false);
        }
        let key = self.prefix_key(fingerprint);
        let deleted = self.backend.delete(&key).await?;
        if deleted {
            self.stats.deletes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(deleted)
    }

    pub async fn purge_expired(&self) -> Result<usize> {
        self.backend.purge_expired().await
    }

    pub async fn len(&self) -> Result<usize> {
        self.backend.len().await
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn encode(
        &self,
        fingerprint: &RequestFingerprint,
        response: &NormalizedAgentResponse,
        ttl: Duration,
    ) -> Result<Option<(RequestFingerprint, Vec<u8>)>> {
        if !self.config.enabled || ttl.is_zero() {
            return Ok(None);
        }
        let entry = CacheEntry::new(fingerprint.clone(), response.clone(), ttl);
        let data = serde_json::to_vec(&entry).map_err(|e| {
            Error::storage_with_context(
                "failed to encode cache entry",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("response_cache"),
            )
        })?;
        if data.len() > self.config.max_entry_size {
            debug!(
                fingerprint = fingerprint.short(),
                size = data.len(),
                "response exceeds max cache entry size, not cached"
            );
            return Ok(None);
        }
        Ok(Some((self.prefix_key(fingerprint), data)))
    }

    fn prefix_key(&self, key: &RequestFingerprint) -> RequestFingerprint {
        if let Some(ref p) = self.config.key_prefix {
            RequestFingerprint::new(format!("{}:{}", p, key.hash))
        } else {
            key.clone()
        }
    }
}

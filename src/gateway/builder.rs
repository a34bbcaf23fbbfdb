use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::core::{Gateway, GatewayInner};
use super::policy::RetryPolicy;
use super::stats::GatewayCounters;
use crate::cache::{CacheBackend, CacheConfig, MemoryCache, ResponseCache};
use crate::config::GatewayConfig;
use crate::fingerprint::FingerprintGenerator;
use crate::invoker::{AgentInvoker, ConversationalInvoker, DirectModelInvoker};
use crate::resilience::{RateLimiter, RateLimiterConfig, RequestCoalescer};
use crate::types::BackendVariant;
use crate::{Error, ErrorContext, Result};

/// Assembles a [`Gateway`] from explicit components.
///
/// Anything not set falls back to its default: a 10-token bucket refilling at
/// 1/s, an unbounded in-memory cache with default TTLs, two retries.
pub struct GatewayBuilder {
    limiter: Option<RateLimiterConfig>,
    cache_config: CacheConfig,
    cache_backend: Option<Box<dyn CacheBackend>>,
    fingerprints: FingerprintGenerator,
    retry: RetryPolicy,
    invokers: HashMap<BackendVariant, Arc<dyn AgentInvoker>>,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            limiter: None,
            cache_config: CacheConfig::default(),
            cache_backend: None,
            fingerprints: FingerprintGenerator::new(),
            retry: RetryPolicy::default(),
            invokers: HashMap::new(),
        }
    }

    /// Builder pre-populated from a validated [`GatewayConfig`], including
    /// HTTP invokers for every configured backend.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let mut builder = Self::new()
            .rate_limiter(config.rate_limit.to_limiter_config())
            .cache_config(config.cache.to_cache_config())
            .cache_backend(config.cache.build_backend())
            .fingerprints(config.fingerprint.generator())
            .retry_policy(config.retry.clone());

        if let Some(ref section) = config.conversational {
            let invoker = ConversationalInvoker::new(section.to_invoker_config()?)?;
            builder = builder.invoker(Arc::new(invoker));
        }
        if let Some(ref section) = config.direct_model {
            let invoker = DirectModelInvoker::new(section.to_invoker_config()?)?;
            builder = builder.invoker(Arc::new(invoker));
        }
        Ok(builder)
    }

    pub fn rate_limiter(mut self, cfg: RateLimiterConfig) -> Self {
        self.limiter = Some(cfg);
        self
    }

    pub fn cache_config(mut self, cfg: CacheConfig) -> Self {
        self.cache_config = cfg;
        self
    }

    pub fn cache_backend(mut self, backend: Box<dyn CacheBackend>) -> Self {
        self.cache_backend = Some(backend);
        self
    }

    pub fn fingerprints(mut self, generator: FingerprintGenerator) -> Self {
        self.fingerprints = generator;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Register the invoker for its variant, replacing any previous one.
    pub fn invoker(mut self, invoker: Arc<dyn AgentInvoker>) -> Self {
        self.invokers.insert(invoker.variant(), invoker);
        self
    }

    pub fn build(self) -> Result<Gateway> {
        if self.invokers.is_empty() {
            return Err(Error::configuration_with_context(
                "gateway needs at least one backend invoker",
                ErrorContext::new().with_source("gateway_builder"),
            ));
        }
        let limiter_config = self.limiter.unwrap_or_default();
        limiter_config.validate()?;
        let backend = self
            .cache_backend
            .unwrap_or_else(|| Box::new(MemoryCache::unbounded()));
        let cache = ResponseCache::new(self.cache_config, backend);
        let limiter = RateLimiter::new(limiter_config);

        let mut backends: Vec<&str> = self.invokers.keys().map(|b| b.as_str()).collect();
        backends.sort_unstable();
        info!(
            backends = ?backends,
            cache_backend = cache.backend_name(),
            max_retries = self.retry.max_retries,
            "gateway assembled"
        );

        Ok(Gateway {
            inner: Arc::new(GatewayInner {
                limiter,
                cache,
                coalescer: RequestCoalescer::new(),
                invokers: self.invokers,
                fingerprints: self.fingerprints,
                retry: self.retry,
                counters: GatewayCounters::default(),
            }),
        })
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

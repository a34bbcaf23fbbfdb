use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::policy::{Decision, RetryPolicy};
use super::stats::{GatewayCounters, GatewayStats};
use crate::cache::ResponseCache;
use crate::fingerprint::{FingerprintGenerator, RequestFingerprint};
use crate::invoker::AgentInvoker;
use crate::resilience::{Admission, RateLimiter, RequestCoalescer};
use crate::types::{AgentRequest, BackendVariant, NormalizedAgentResponse};
use crate::{Error, ErrorContext, Result};

/// Where a reply came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplySource {
    Cache,
    Upstream,
}

/// Successful gateway result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayReply {
    #[serde(rename = "normalizedResponse")]
    pub response: NormalizedAgentResponse,
    pub source: ReplySource,
    pub fingerprint: RequestFingerprint,
}

pub(crate) struct GatewayInner {
    pub limiter: RateLimiter,
    pub cache: ResponseCache,
    pub coalescer: RequestCoalescer<NormalizedAgentResponse>,
    pub invokers: HashMap<BackendVariant, Arc<dyn AgentInvoker>>,
    pub fingerprints: FingerprintGenerator,
    pub retry: RetryPolicy,
    pub counters: GatewayCounters,
}

/// Request orchestrator: rate check, cache lookup, coalesced invoke with
/// retry, cache store.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Gateway {
    pub(crate) inner: Arc<GatewayInner>,
}

impl Gateway {
    pub fn builder() -> super::GatewayBuilder {
        super::GatewayBuilder::new()
    }

    /// Handle one agent request end to end.
    ///
    /// A conversational request without a session starts a new conversation:
    /// it is given a fresh session id here, before fingerprinting, so it can
    /// never share a cache entry or an in-flight call with another caller.
    pub async fn handle(&self, mut request: AgentRequest) -> Result<GatewayReply> {
        let inner = &self.inner;
        GatewayCounters::incr(&inner.counters.requests);
        debug!(caller_id = %request.caller_id, backend = %request.backend, "request received");

        if let Err(e) = request.validate() {
            GatewayCounters::incr(&inner.counters.failures);
            return Err(e);
        }

        if let Admission::Denied { retry_after } =
            inner.limiter.check_and_consume(&request.caller_id, 1)
        {
            GatewayCounters::incr(&inner.counters.rate_limited);
            GatewayCounters::incr(&inner.counters.failures);
            debug!(
                caller_id = %request.caller_id,
                retry_after_ms = retry_after.as_millis() as u64,
                "rate check denied"
            );
            return Err(Error::RateLimited { retry_after });
        }
        debug!(caller_id = %request.caller_id, "rate check passed");

        if request.backend == BackendVariant::Conversational && request.session_id.is_none() {
            let session_id = Uuid::new_v4().to_string();
            debug!(caller_id = %request.caller_id, session_id = %session_id, "new conversation");
            request.session_id = Some(session_id);
        }

        let fingerprint = inner.fingerprints.fingerprint(&request);
        if let Some(response) = inner.cached(&fingerprint).await {
            GatewayCounters::incr(&inner.counters.cache_hits);
            debug!(fingerprint = fingerprint.short(), "cache hit");
            return Ok(GatewayReply {
                response,
                source: ReplySource::Cache,
                fingerprint,
            });
        }
        GatewayCounters::incr(&inner.counters.cache_misses);
        debug!(fingerprint = fingerprint.short(), "cache miss");

        let producer_inner = Arc::clone(&self.inner);
        let producer_fp = fingerprint.clone();
        let outcome = inner
            .coalescer
            .run_exclusive(&fingerprint, move || async move {
                producer_inner.produce(&request, &producer_fp).await
            })
            .await;

        match outcome {
            Ok(response) => Ok(GatewayReply {
                response,
                source: ReplySource::Upstream,
                fingerprint,
            }),
            Err(e) => {
                GatewayCounters::incr(&inner.counters.failures);
                debug!(fingerprint = fingerprint.short(), error = %e, "request failed");
                Err(e)
            }
        }
    }

    pub fn fingerprint(&self, request: &AgentRequest) -> RequestFingerprint {
        self.inner.fingerprints.fingerprint(request)
    }

    pub fn stats(&self) -> GatewayStats {
        let inner = &self.inner;
        GatewayStats {
            in_flight: inner.coalescer.in_flight(),
            rate_buckets: inner.limiter.bucket_count(),
            cache: inner.cache.stats(),
            ..inner.counters.snapshot()
        }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    /// Backends this gateway can route to.
    pub fn backends(&self) -> Vec<BackendVariant> {
        let mut v: Vec<_> = self.inner.invokers.keys().copied().collect();
        v.sort_by_key(|b| b.as_str());
        v
    }
}

impl GatewayInner {
    /// Cache read that degrades to a miss on storage failure.
    async fn cached(&self, fingerprint: &RequestFingerprint) -> Option<NormalizedAgentResponse> {
        match self.cache.get(fingerprint).await {
            Ok(entry) => entry.map(|e| e.response),
            Err(e) => {
                warn!(fingerprint = fingerprint.short(), error = %e, "cache lookup failed");
                None
            }
        }
    }

    /// Leader path: invoke with retry, then store. Runs once per coalesced group.
    async fn produce(
        &self,
        request: &AgentRequest,
        fingerprint: &RequestFingerprint,
    ) -> Result<NormalizedAgentResponse> {
        // A previous leader may have stored between our lookup and joining.
        if let Some(response) = self.cached(fingerprint).await {
            return Ok(response);
        }

        let invoker = self.invokers.get(&request.backend).ok_or_else(|| {
            Error::configuration_with_context(
                format!("no invoker configured for backend '{}'", request.backend),
                ErrorContext::new()
                    .with_field_path("request.backendVariant")
                    .with_source("gateway"),
            )
        })?;

        let response = self.invoke_with_retry(invoker.as_ref(), request, fingerprint).await?;
        debug!(fingerprint = fingerprint.short(), items = response.structured_items.len(), "response normalized");

        let ttl = self.cache.config().ttl_for(request);
        match self.cache.put(fingerprint, &response, ttl).await {
            Ok(()) => debug!(fingerprint = fingerprint.short(), ttl_secs = ttl.as_secs(), "response cached"),
            Err(e) => {
                GatewayCounters::incr(&self.counters.cache_store_failures);
                warn!(fingerprint = fingerprint.short(), error = %e, "failed to cache response");
            }
        }
        Ok(response)
    }

    async fn invoke_with_retry(
        &self,
        invoker: &dyn AgentInvoker,
        request: &AgentRequest,
        fingerprint: &RequestFingerprint,
    ) -> Result<NormalizedAgentResponse> {
        let mut attempt: u32 = 0;
        loop {
            let start = Instant::now();
            GatewayCounters::incr(&self.counters.upstream_calls);
            debug!(fingerprint = fingerprint.short(), backend = %request.backend, attempt, "invoking upstream");

            let err = match Self::invoke_once(invoker, request).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };
            info!(
                fingerprint = fingerprint.short(),
                backend = %request.backend,
                attempt,
                error_code = err.kind().code(),
                duration_ms = start.elapsed().as_millis() as u64,
                "upstream attempt failed"
            );

            match self.retry.decide(&err, attempt) {
                Decision::Retry { delay } => {
                    GatewayCounters::incr(&self.counters.retries);
                    info!(
                        fingerprint = fingerprint.short(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying upstream call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Decision::Fail => return Err(self.retry.exhausted(err, attempt + 1)),
            }
        }
    }

    async fn invoke_once(
        invoker: &dyn AgentInvoker,
        request: &AgentRequest,
    ) -> Result<NormalizedAgentResponse> {
        let timeout: Duration = invoker.timeout();
        match tokio::time::timeout(timeout, invoker.invoke(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::UpstreamTimeout { timeout }),
        }
    }
}

use reqwest::header::HeaderMap;
use reqwest::Proxy;
use serde_json::Value;
use std::env;
use std::time::Duration;
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::error_code::ErrorKind;
use crate::{Error, ErrorContext, Result};

/// Longest upstream error body echoed into an error message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub base_url: String,
    /// Bound on one request, connect through body read.
    pub timeout: Duration,
    /// Bearer token sent on every request, if any.
    pub api_key: Option<String>,
}

impl TransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(20),
            api_key: None,
        }
    }
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpTransport {
    pub fn new(cfg: TransportConfig) -> Result<Self> {
        let mut base = cfg.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid upstream base url: {}", cfg.base_url),
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("http_transport"),
            )
        })?;

        // Minimal production-friendly defaults (env-overridable).
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(
                env::var("AGENT_GATEWAY_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(32),
            )
            .pool_idle_timeout(Some(Duration::from_secs(
                env::var("AGENT_GATEWAY_HTTP_POOL_IDLE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(90),
            )));

        if let Ok(proxy_url) = env::var("AGENT_GATEWAY_PROXY_URL") {
            if let Ok(proxy) = Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder.build().map_err(|e| {
            Error::configuration_with_context(
                "failed to build http client",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("http_transport"),
            )
        })?;

        Ok(Self {
            client,
            base_url,
            timeout: cfg.timeout,
            api_key: cfg.api_key,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve `path` against the base url. Path segments are percent-encoded.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                Error::configuration_with_context(
                    "upstream base url cannot carry a path",
                    ErrorContext::new().with_source("http_transport"),
                )
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// POST a JSON body and return the decoded JSON response.
    ///
    /// The whole exchange is bounded by the configured timeout and surfaces
    /// `UpstreamTimeout` when exceeded. No retries happen here.
    pub async fn post_json(&self, url: Url, body: &Value) -> Result<Value> {
        let timeout = self.timeout;
        match tokio::time::timeout(timeout, self.exchange(url, body)).await {
            Ok(result) => result,
            Err(_) => Err(Error::UpstreamTimeout { timeout }),
        }
    }

    async fn exchange(&self, url: Url, body: &Value) -> Result<Value> {
        let request_id = Uuid::new_v4().to_string();
        let start = std::time::Instant::now();
        let mut req = self
            .client
            .post(url.clone())
            .json(body)
            .header("accept", "application/json")
            .header("x-agent-gateway-request-id", &request_id);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| self.map_send_error(e))?;
        let status = resp.status().as_u16();

        if let Some(kind) = ErrorKind::from_http_status(status) {
            let retry_after = retry_after(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            info!(
                http_status = status,
                error_kind = kind.name(),
                endpoint = url.path(),
                request_id = request_id.as_str(),
                duration_ms = start.elapsed().as_millis() as u64,
                "upstream request failed"
            );
            return Err(match kind {
                ErrorKind::UpstreamRateLimited => Error::UpstreamRateLimited { retry_after },
                ErrorKind::UpstreamTimeout => Error::UpstreamTimeout {
                    timeout: start.elapsed(),
                },
                ErrorKind::UpstreamRejected => Error::UpstreamRejected {
                    status,
                    message: truncate(&text),
                },
                _ => Error::unavailable(format!("HTTP {}: {}", status, truncate(&text))),
            });
        }

        let bytes = resp.bytes().await.map_err(|e| self.map_send_error(e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::parse(format!("upstream body is not JSON: {}", e)))
    }

    fn map_send_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::UpstreamTimeout {
                timeout: self.timeout,
            }
        } else {
            Error::unavailable(e.to_string())
        }
    }
}

/// Server backoff hint from `retry-after-ms` or `retry-after` (seconds).
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    if let Some(ms) = headers
        .get("retry-after-ms")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
    {
        return Some(Duration::from_millis(ms));
    }
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_ERROR_BODY {
        return text.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

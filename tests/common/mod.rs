//! Shared fixtures for integration tests.
#![allow(dead_code)]

use agent_gateway::{AgentInvoker, AgentRequest, BackendVariant, Error, NormalizedAgentResponse, Result};
use async_trait::async_trait;
use mockito::{Matcher, Mock, Server, ServerGuard};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted upstream outcome.
#[derive(Debug)]
pub enum Step {
    Reply(String),
    Fail(Error),
    /// Never answers; the gateway's per-attempt timeout fires.
    Hang,
}

/// In-process invoker that plays back a script, then echoes the query.
/// Replies carry the request's session id, as a conversational agent's do.
#[derive(Debug)]
pub struct ScriptedInvoker {
    variant: BackendVariant,
    latency: Duration,
    timeout: Duration,
    calls: AtomicUsize,
    steps: Mutex<VecDeque<Step>>,
}

impl ScriptedInvoker {
    pub fn new(variant: BackendVariant) -> Self {
        Self {
            variant,
            latency: Duration::ZERO,
            timeout: Duration::from_secs(20),
            calls: AtomicUsize::new(0),
            steps: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn then(self, step: Step) -> Self {
        self.steps.lock().unwrap().push_back(step);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentInvoker for ScriptedInvoker {
    fn variant(&self) -> BackendVariant {
        self.variant
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self, request: &AgentRequest) -> Result<NormalizedAgentResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().unwrap().pop_front();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let reply = |text: String| {
            let response = NormalizedAgentResponse::new(self.variant, text);
            match request.session_id {
                Some(ref sid) => response.with_session(sid.clone()),
                None => response,
            }
        };
        match step {
            Some(Step::Reply(text)) => Ok(reply(text)),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Err(Error::unavailable("hang step woke up"))
            }
            None => Ok(reply(format!("echo: {}", request.query))),
        }
    }
}

/// mockito server standing in for an upstream backend.
pub struct MockUpstream {
    pub server: ServerGuard,
}

impl MockUpstream {
    pub async fn new() -> Self {
        Self {
            server: Server::new_async().await,
        }
    }

    pub fn url(&self) -> String {
        self.server.url()
    }

    pub async fn json(&mut self, path: impl Into<Matcher>, status: usize, body: &str, hits: usize) -> Mock {
        self.server
            .mock("POST", path)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .expect(hits)
            .create_async()
            .await
    }

    pub async fn throttled(&mut self, path: impl Into<Matcher>, retry_after_secs: u64, hits: usize) -> Mock {
        self.server
            .mock("POST", path)
            .with_status(429)
            .with_header("retry-after", &retry_after_secs.to_string())
            .with_body(r#"{"message":"Too many requests"}"#)
            .expect(hits)
            .create_async()
            .await
    }
}

/// Base64 chunk event as emitted by the conversational runtime.
pub fn completion_chunk(text: &str) -> serde_json::Value {
    use base64::Engine as _;
    serde_json::json!({
        "chunk": { "bytes": base64::engine::general_purpose::STANDARD.encode(text) }
    })
}

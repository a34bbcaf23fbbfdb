//! HTTP invokers against a mockito upstream.

mod common;

use agent_gateway::gateway::{Gateway, ReplySource, RetryPolicy};
use agent_gateway::invoker::{
    ConversationalConfig, ConversationalInvoker, DirectModelConfig, DirectModelInvoker,
};
use agent_gateway::{AgentInvoker, AgentRequest, BackendVariant, Error};
use common::{completion_chunk, MockUpstream};
use mockito::Matcher;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const MODEL_PATH: &str = "/model/anthropic.claude-3-haiku/invoke";

fn session_path() -> Matcher {
    Matcher::Regex(r"^/agents/SHOP/agentAliases/PROD/sessions/[^/]+/text$".to_string())
}

fn conversational(base: &str) -> ConversationalInvoker {
    ConversationalInvoker::new(
        ConversationalConfig::new(base, "SHOP", "PROD").with_timeout(Duration::from_secs(5)),
    )
    .unwrap()
}

fn direct_model(base: &str) -> DirectModelInvoker {
    DirectModelInvoker::new(
        DirectModelConfig::new(base, "anthropic.claude-3-haiku")
            .with_timeout(Duration::from_secs(5))
            .with_api_key("test-key"),
    )
    .unwrap()
}

#[tokio::test]
async fn conversational_chunks_are_joined_and_items_extracted() {
    let mut upstream = MockUpstream::new().await;
    let body = json!({
        "completion": [
            completion_chunk("Here are my picks:\n```json\n{\"products\": ["),
            {"trace": {"orchestration": "ignored"}},
            completion_chunk("{\"sku\": \"CAM-1\", \"name\": \"Alpha 7\", \"confidence\": 0.9}]}\n```"),
        ],
        "sessionId": "sess-42"
    });
    let mock = upstream
        .json(session_path(), 200, &body.to_string(), 1)
        .await;

    let invoker = conversational(&upstream.url());
    let req = AgentRequest::new("buyer", BackendVariant::Conversational, "camera for travel")
        .with_param("budget", 800)
        .with_session("sess-42");
    let resp = invoker.invoke(&req).await.unwrap();

    mock.assert_async().await;
    assert!(resp.text.starts_with("Here are my picks:"));
    assert_eq!(resp.session_id.as_deref(), Some("sess-42"));
    assert_eq!(resp.structured_items.len(), 1);
    assert_eq!(resp.structured_items[0].id, "CAM-1");
    assert_eq!(resp.structured_items[0].label, "Alpha 7");
}

#[tokio::test]
async fn conversational_request_carries_session_attributes() {
    let mut upstream = MockUpstream::new().await;
    let mock = upstream
        .server
        .mock("POST", session_path())
        .match_body(Matcher::PartialJson(json!({
            "inputText": "gift ideas",
            "sessionState": {"promptSessionAttributes": {"budget": "50", "recipient": "dad"}}
        })))
        .with_status(200)
        .with_body(json!({"completion": [completion_chunk("a wallet")]}).to_string())
        .create_async()
        .await;

    let req = AgentRequest::new("buyer", BackendVariant::Conversational, "gift ideas")
        .with_param("budget", 50)
        .with_param("recipient", "dad");
    let resp = conversational(&upstream.url()).invoke(&req).await.unwrap();
    mock.assert_async().await;
    assert_eq!(resp.text, "a wallet");
    assert!(resp.session_id.is_some());
}

#[tokio::test]
async fn direct_model_sends_messages_body_with_bearer_token() {
    let mut upstream = MockUpstream::new().await;
    let mock = upstream
        .server
        .mock("POST", MODEL_PATH)
        .match_header("authorization", "Bearer test-key")
        .match_body(Matcher::PartialJson(json!({
            "anthropic_version": "bedrock-2023-05-31",
            "max_tokens": 300,
            "messages": [{"role": "user"}]
        })))
        .with_status(200)
        .with_body(
            json!({
                "content": [{"type": "text", "text": "List at $42."}],
                "stop_reason": "end_turn"
            })
            .to_string(),
        )
        .create_async()
        .await;

    let req = AgentRequest::new("seller", BackendVariant::DirectModel, "price my lamp")
        .with_param("max_tokens", 300);
    let resp = direct_model(&upstream.url()).invoke(&req).await.unwrap();
    mock.assert_async().await;
    assert_eq!(resp.text, "List at $42.");
    assert_eq!(resp.raw["stop_reason"], "end_turn");
}

#[tokio::test]
async fn http_statuses_are_classified() {
    let mut upstream = MockUpstream::new().await;
    let invoker = direct_model(&upstream.url());
    let req = AgentRequest::new("seller", BackendVariant::DirectModel, "q");

    let throttle = upstream.throttled(MODEL_PATH, 7, 1).await;
    match invoker.invoke(&req).await {
        Err(Error::UpstreamRateLimited { retry_after }) => {
            assert_eq!(retry_after, Some(Duration::from_secs(7)))
        }
        other => panic!("expected UpstreamRateLimited, got {:?}", other),
    }
    throttle.assert_async().await;
    throttle.remove_async().await;

    let rejected = upstream
        .json(MODEL_PATH, 400, r#"{"message":"bad max_tokens"}"#, 1)
        .await;
    match invoker.invoke(&req).await {
        Err(Error::UpstreamRejected { status, message }) => {
            assert_eq!(status, 400);
            assert!(message.contains("bad max_tokens"));
        }
        other => panic!("expected UpstreamRejected, got {:?}", other),
    }
    rejected.remove_async().await;

    let broken = upstream.json(MODEL_PATH, 503, "overloaded", 1).await;
    assert!(matches!(
        invoker.invoke(&req).await,
        Err(Error::UpstreamUnavailable { .. })
    ));
    broken.remove_async().await;

    let garbage = upstream.json(MODEL_PATH, 200, "<html>not json</html>", 1).await;
    assert!(matches!(
        invoker.invoke(&req).await,
        Err(Error::ResponseParse { .. })
    ));
    garbage.remove_async().await;

    let wrong_shape = upstream
        .json(MODEL_PATH, 200, r#"{"choices":[{"text":"hi"}]}"#, 1)
        .await;
    assert!(matches!(
        invoker.invoke(&req).await,
        Err(Error::ResponseParse { .. })
    ));
    wrong_shape.assert_async().await;
}

#[tokio::test]
async fn unreachable_upstream_is_unavailable() {
    // Nothing listens on port 9 (discard) in the test environment.
    let invoker = direct_model("http://127.0.0.1:9");
    let req = AgentRequest::new("seller", BackendVariant::DirectModel, "q");
    assert!(matches!(
        invoker.invoke(&req).await,
        Err(Error::UpstreamUnavailable { .. })
    ));
}

#[tokio::test]
async fn gateway_retries_server_errors_then_gives_up() {
    let mut upstream = MockUpstream::new().await;
    let mock = upstream.json(MODEL_PATH, 500, "boom", 3).await;

    let gateway = Gateway::builder()
        .retry_policy(RetryPolicy::new(2).with_delays(Duration::from_millis(1), Duration::from_millis(5)))
        .invoker(Arc::new(direct_model(&upstream.url())))
        .build()
        .unwrap();

    let err = gateway
        .handle(AgentRequest::new("seller", BackendVariant::DirectModel, "q"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UpstreamUnavailable { .. }));
    mock.assert_async().await;
    assert_eq!(gateway.stats().retries, 2);
}

#[tokio::test]
async fn gateway_caches_http_answers() {
    let mut upstream = MockUpstream::new().await;
    let mock = upstream
        .json(
            MODEL_PATH,
            200,
            r#"{"content":[{"type":"text","text":"[{\"id\":\"p1\",\"label\":\"$10\",\"score\":1}]"}]}"#,
            1,
        )
        .await;

    let gateway = Gateway::builder()
        .invoker(Arc::new(direct_model(&upstream.url())))
        .build()
        .unwrap();
    let req = AgentRequest::new("seller", BackendVariant::DirectModel, "price it");

    let first = gateway.handle(req.clone()).await.unwrap();
    let second = gateway.handle(req).await.unwrap();
    mock.assert_async().await;
    assert_eq!(first.source, ReplySource::Upstream);
    assert_eq!(second.source, ReplySource::Cache);
    assert_eq!(second.response.structured_items[0].id, "p1");
}

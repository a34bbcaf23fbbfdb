//! End-to-end gateway behavior against scripted in-process backends.

mod common;

use agent_gateway::cache::CacheConfig;
use agent_gateway::gateway::{Gateway, ReplySource, RetryPolicy};
use agent_gateway::resilience::RateLimiterConfig;
use agent_gateway::{AgentRequest, BackendVariant, Error};
use common::{ScriptedInvoker, Step};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn fast_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(max_retries).with_delays(Duration::from_millis(100), Duration::from_secs(5))
}

fn gateway_with(invoker: &Arc<ScriptedInvoker>, retry: RetryPolicy) -> Gateway {
    Gateway::builder()
        .rate_limiter(RateLimiterConfig::new().with_capacity(1_000).with_refill_rate(1_000.0))
        .retry_policy(retry)
        .invoker(invoker.clone())
        .build()
        .unwrap()
}

fn ask(caller: &str, query: &str) -> AgentRequest {
    AgentRequest::new(caller, BackendVariant::DirectModel, query).with_param("category", "cameras")
}

#[tokio::test(start_paused = true)]
async fn concurrent_identical_requests_make_one_upstream_call() {
    let invoker = Arc::new(
        ScriptedInvoker::new(BackendVariant::DirectModel).with_latency(Duration::from_millis(250)),
    );
    let gateway = gateway_with(&invoker, fast_retries(2));

    // Two callers, same question, parameters in different order.
    let a = AgentRequest::new("buyer-a", BackendVariant::DirectModel, "best mirrorless under $800")
        .with_param("category", "cameras")
        .with_param("condition", "new");
    let b = AgentRequest::new("buyer-b", BackendVariant::DirectModel, "best mirrorless under $800")
        .with_param("condition", "new")
        .with_param("category", "cameras");

    let (ra, rb) = tokio::join!(gateway.handle(a), gateway.handle(b));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(invoker.calls(), 1);
    assert_eq!(ra.fingerprint, rb.fingerprint);
    assert_eq!(ra.response, rb.response);
    assert_eq!(ra.source, ReplySource::Upstream);
    assert_eq!(rb.source, ReplySource::Upstream);
    assert_eq!(gateway.stats().upstream_calls, 1);
    assert_eq!(gateway.stats().in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn many_waiters_share_one_result() {
    let invoker = Arc::new(
        ScriptedInvoker::new(BackendVariant::DirectModel).with_latency(Duration::from_millis(100)),
    );
    let gateway = gateway_with(&invoker, fast_retries(2));

    let replies = join_all((0..32).map(|i| gateway.handle(ask(&format!("buyer-{}", i), "tripods"))))
        .await;
    assert!(replies.iter().all(|r| r.is_ok()));
    assert_eq!(invoker.calls(), 1);

    // Later callers are served from cache.
    let later = gateway.handle(ask("buyer-late", "tripods")).await.unwrap();
    assert_eq!(later.source, ReplySource::Cache);
    assert_eq!(invoker.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn shared_failure_reaches_every_waiter_and_is_not_cached() {
    let invoker = Arc::new(
        ScriptedInvoker::new(BackendVariant::DirectModel)
            .with_latency(Duration::from_millis(100))
            .then(Step::Fail(Error::parse("unexpected envelope"))),
    );
    let gateway = gateway_with(&invoker, fast_retries(2));

    let replies = join_all((0..5).map(|i| gateway.handle(ask(&format!("c{}", i), "lenses")))).await;
    for r in &replies {
        assert!(matches!(r, Err(Error::ResponseParse { .. })));
    }
    assert_eq!(invoker.calls(), 1);

    // The next caller retries immediately and succeeds.
    let reply = gateway.handle(ask("c9", "lenses")).await.unwrap();
    assert_eq!(reply.source, ReplySource::Upstream);
    assert_eq!(invoker.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn sixth_call_over_capacity_is_rate_limited() {
    let invoker = Arc::new(ScriptedInvoker::new(BackendVariant::DirectModel));
    let gateway = Gateway::builder()
        .rate_limiter(RateLimiterConfig::new().with_capacity(5).with_refill_rate(1.0))
        .invoker(invoker.clone())
        .build()
        .unwrap();

    for i in 0..5 {
        gateway
            .handle(ask("buyer-1", &format!("query {}", i)))
            .await
            .unwrap();
    }
    match gateway.handle(ask("buyer-1", "query 5")).await {
        Err(Error::RateLimited { retry_after }) => assert!(retry_after > Duration::ZERO),
        other => panic!("expected RateLimited, got {:?}", other),
    }
    // Other callers are unaffected.
    assert!(gateway.handle(ask("buyer-2", "query 5")).await.is_ok());
    assert_eq!(gateway.stats().rate_limited, 1);

    // One refill later the first caller is admitted again.
    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(gateway.handle(ask("buyer-1", "query 5")).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn malformed_payload_is_not_retried() {
    let invoker = Arc::new(
        ScriptedInvoker::new(BackendVariant::DirectModel)
            .then(Step::Fail(Error::parse("completion missing"))),
    );
    let gateway = gateway_with(&invoker, fast_retries(3));

    let err = gateway.handle(ask("b", "q")).await.unwrap_err();
    assert!(matches!(err, Error::ResponseParse { .. }));
    assert_eq!(invoker.calls(), 1);
    assert_eq!(gateway.stats().retries, 0);
}

#[tokio::test(start_paused = true)]
async fn two_timeouts_then_success_within_budget() {
    let invoker = Arc::new(
        ScriptedInvoker::new(BackendVariant::DirectModel)
            .with_timeout(Duration::from_secs(2))
            .then(Step::Hang)
            .then(Step::Hang)
            .then(Step::Reply("third time lucky".into())),
    );
    let gateway = gateway_with(&invoker, fast_retries(3));

    let start = Instant::now();
    let reply = gateway.handle(ask("b", "q")).await.unwrap();
    assert_eq!(reply.response.text, "third time lucky");
    assert_eq!(invoker.calls(), 3);
    assert_eq!(gateway.stats().retries, 2);
    // 2 timeouts plus 100ms and 200ms of backoff
    assert!(start.elapsed() >= Duration::from_millis(4_300));
}

#[tokio::test(start_paused = true)]
async fn exhausted_timeouts_surface_as_unavailable() {
    let invoker = Arc::new(
        ScriptedInvoker::new(BackendVariant::DirectModel)
            .with_timeout(Duration::from_secs(1))
            .then(Step::Hang)
            .then(Step::Hang)
            .then(Step::Hang),
    );
    let gateway = gateway_with(&invoker, fast_retries(2));

    match gateway.handle(ask("b", "q")).await {
        Err(Error::UpstreamUnavailable { message }) => {
            assert!(message.contains("3 attempts"), "{}", message);
            assert!(message.contains("timed out"), "{}", message);
        }
        other => panic!("expected UpstreamUnavailable, got {:?}", other),
    }
    assert_eq!(invoker.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn upstream_throttle_hint_is_honored() {
    let invoker = Arc::new(
        ScriptedInvoker::new(BackendVariant::DirectModel)
            .then(Step::Fail(Error::UpstreamRateLimited {
                retry_after: Some(Duration::from_secs(3)),
            }))
            .then(Step::Reply("ok".into())),
    );
    let gateway = gateway_with(&invoker, fast_retries(2));

    let start = Instant::now();
    let req = AgentRequest::new("s", BackendVariant::DirectModel, "price check");
    assert_eq!(gateway.handle(req).await.unwrap().response.text, "ok");
    assert!(start.elapsed() >= Duration::from_secs(3));
    assert_eq!(invoker.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_upstream_throttle_surfaces_as_is() {
    let throttled = || {
        Step::Fail(Error::UpstreamRateLimited {
            retry_after: Some(Duration::from_millis(10)),
        })
    };
    let invoker = Arc::new(
        ScriptedInvoker::new(BackendVariant::DirectModel)
            .then(throttled())
            .then(throttled()),
    );
    let gateway = gateway_with(&invoker, fast_retries(1));

    let req = AgentRequest::new("s", BackendVariant::DirectModel, "price check");
    let err = gateway.handle(req).await.unwrap_err();
    assert!(matches!(err, Error::UpstreamRateLimited { .. }));
    assert_eq!(err.retry_after(), Some(Duration::from_millis(10)));
    assert_eq!(invoker.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn rejected_request_is_not_retried() {
    let invoker = Arc::new(
        ScriptedInvoker::new(BackendVariant::DirectModel).then(Step::Fail(Error::UpstreamRejected {
            status: 400,
            message: "max_tokens too large".into(),
        })),
    );
    let gateway = gateway_with(&invoker, fast_retries(3));
    let req = AgentRequest::new("s", BackendVariant::DirectModel, "q");
    assert!(matches!(
        gateway.handle(req).await,
        Err(Error::UpstreamRejected { status: 400, .. })
    ));
    assert_eq!(invoker.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn abandoned_caller_does_not_cancel_shared_call() {
    let invoker = Arc::new(
        ScriptedInvoker::new(BackendVariant::DirectModel).with_latency(Duration::from_secs(1)),
    );
    let gateway = gateway_with(&invoker, fast_retries(2));

    let leader = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.handle(ask("impatient", "drones")).await })
    };
    while invoker.calls() == 0 {
        tokio::task::yield_now().await;
    }
    let follower = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.handle(ask("patient", "drones")).await })
    };
    tokio::task::yield_now().await;
    leader.abort();

    let reply = follower.await.unwrap().unwrap();
    assert_eq!(reply.response.text, "echo: drones");
    assert_eq!(invoker.calls(), 1);

    // The abandoned call still populated the cache.
    let again = gateway.handle(ask("someone", "drones")).await.unwrap();
    assert_eq!(again.source, ReplySource::Cache);
}

#[tokio::test]
async fn backends_are_routed_by_variant() {
    let conv = Arc::new(ScriptedInvoker::new(BackendVariant::Conversational));
    let model = Arc::new(ScriptedInvoker::new(BackendVariant::DirectModel));
    let gateway = Gateway::builder()
        .invoker(conv.clone())
        .invoker(model.clone())
        .build()
        .unwrap();

    let a = gateway
        .handle(AgentRequest::new("x", BackendVariant::Conversational, "same words"))
        .await
        .unwrap();
    let b = gateway
        .handle(AgentRequest::new("x", BackendVariant::DirectModel, "same words"))
        .await
        .unwrap();
    assert_ne!(a.fingerprint, b.fingerprint);
    assert_eq!((conv.calls(), model.calls()), (1, 1));
    assert_eq!(
        gateway.backends(),
        vec![BackendVariant::Conversational, BackendVariant::DirectModel]
    );
}

fn conversational_gateway(invoker: &Arc<ScriptedInvoker>) -> Gateway {
    Gateway::builder()
        .rate_limiter(RateLimiterConfig::new().with_capacity(100).with_refill_rate(100.0))
        .invoker(invoker.clone())
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn new_conversations_never_share_sessions_or_answers() {
    let invoker = Arc::new(
        ScriptedInvoker::new(BackendVariant::Conversational).with_latency(Duration::from_millis(50)),
    );
    let gateway = conversational_gateway(&invoker);
    let tent = |caller: &str| AgentRequest::new(caller, BackendVariant::Conversational, "recommend a tent");

    let (alice, bob) = tokio::join!(gateway.handle(tent("alice")), gateway.handle(tent("bob")));
    let (alice, bob) = (alice.unwrap(), bob.unwrap());
    assert_eq!(alice.source, ReplySource::Upstream);
    assert_eq!(bob.source, ReplySource::Upstream);
    assert!(alice.response.session_id.is_some());
    assert!(bob.response.session_id.is_some());
    assert_ne!(alice.response.session_id, bob.response.session_id);
    assert_ne!(alice.fingerprint, bob.fingerprint);

    // A later new conversation is not served an earlier one's cached reply.
    let dave = gateway.handle(tent("dave")).await.unwrap();
    assert_eq!(dave.source, ReplySource::Upstream);
    assert_ne!(dave.response.session_id, alice.response.session_id);
    assert_eq!(invoker.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn explicit_sessions_are_kept_apart() {
    let invoker = Arc::new(
        ScriptedInvoker::new(BackendVariant::Conversational).with_latency(Duration::from_millis(50)),
    );
    let gateway = conversational_gateway(&invoker);
    let tent = |caller: &str, session: &str| {
        AgentRequest::new(caller, BackendVariant::Conversational, "recommend a tent").with_session(session)
    };

    let first = gateway.handle(tent("alice", "alice-conv-1")).await.unwrap();
    let (carol, erin) = tokio::join!(
        gateway.handle(tent("carol", "carol-conv-7")),
        gateway.handle(tent("erin", "erin-conv-2")),
    );
    let (carol, erin) = (carol.unwrap(), erin.unwrap());
    assert_eq!(first.response.session_id.as_deref(), Some("alice-conv-1"));
    assert_eq!(carol.response.session_id.as_deref(), Some("carol-conv-7"));
    assert_eq!(erin.response.session_id.as_deref(), Some("erin-conv-2"));
    assert_eq!(carol.source, ReplySource::Upstream);
    assert_eq!(invoker.calls(), 3);

    // The same conversation repeating itself does hit the cache.
    let again = gateway.handle(tent("carol", "carol-conv-7")).await.unwrap();
    assert_eq!(again.source, ReplySource::Cache);
    assert_eq!(again.response.session_id.as_deref(), Some("carol-conv-7"));
    assert_eq!(invoker.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn price_sensitive_request_never_reads_an_entry_past_its_budget() {
    let invoker = Arc::new(ScriptedInvoker::new(BackendVariant::DirectModel));
    let gateway = Gateway::builder()
        .cache_config(
            CacheConfig::new()
                .with_ttl(BackendVariant::DirectModel, Duration::from_secs(600))
                .with_price_sensitive_ttl(Duration::from_secs(30)),
        )
        .invoker(invoker.clone())
        .build()
        .unwrap();
    let tripod = || AgentRequest::new("buyer", BackendVariant::DirectModel, "price of tripod");

    let plain = gateway.handle(tripod()).await.unwrap();
    assert_eq!(plain.source, ReplySource::Upstream);

    tokio::time::advance(Duration::from_secs(300)).await;
    let priced = gateway.handle(tripod().price_sensitive(true)).await.unwrap();
    assert_eq!(priced.source, ReplySource::Upstream);
    assert_eq!(invoker.calls(), 2);

    // Within its own budget the price-sensitive answer is reused.
    tokio::time::advance(Duration::from_secs(10)).await;
    let again = gateway.handle(tripod().price_sensitive(true)).await.unwrap();
    assert_eq!(again.source, ReplySource::Cache);

    tokio::time::advance(Duration::from_secs(25)).await;
    let stale = gateway.handle(tripod().price_sensitive(true)).await.unwrap();
    assert_eq!(stale.source, ReplySource::Upstream);

    // The plain entry is still within its own TTL.
    assert_eq!(gateway.handle(tripod()).await.unwrap().source, ReplySource::Cache);
    assert_eq!(invoker.calls(), 3);
}

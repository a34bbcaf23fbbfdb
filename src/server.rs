//! HTTP surface (feature `server`).
//!
//! | Route | Description |
//! |-------|-------------|
//! | `POST /ai/query` | Run an [`AgentRequest`] through the gateway |
//! | `GET /health` | Liveness and configured backends |
//! | `GET /stats` | [`GatewayStats`](crate::gateway::GatewayStats) snapshot |
//!
//! Errors are returned as `{"error": {"kind", "code", "message", "retryAfter"?}}`.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::gateway::{Gateway, GatewayReply};
use crate::types::AgentRequest;
use crate::{Error, ErrorContext};

/// Gateway error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Error);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    kind: &'static str,
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<f64>,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self.0 {
            Error::RateLimited { .. } | Error::UpstreamRateLimited { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Error::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::UpstreamUnavailable { .. }
            | Error::UpstreamRejected { .. }
            | Error::ResponseParse { .. } => StatusCode::BAD_GATEWAY,
            Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::Configuration { .. }
            | Error::Storage { .. }
            | Error::InternalCoalescing { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.0.kind();
        let retry_after = self.0.retry_after();
        let body = ErrorBody {
            kind: kind.name(),
            code: kind.code(),
            message: self.0.to_string(),
            retry_after: retry_after.map(|d| d.as_secs_f64()),
        };

        let mut response = (status, Json(json!({ "error": body }))).into_response();

        // Retry-After: whole seconds, rounded up
        if let Some(d) = retry_after {
            let secs = d.as_secs().saturating_add(u64::from(d.subsec_nanos() > 0));
            if let Ok(v) = HeaderValue::from_str(&secs.max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, v);
            }
        }
        response
    }
}

pub fn router(gateway: Gateway) -> Router {
    Router::new()
        .route("/ai/query", post(query))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

async fn query(
    State(gateway): State<Gateway>,
    payload: Result<Json<AgentRequest>, JsonRejection>,
) -> Result<Json<GatewayReply>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        Error::validation_with_context(
            rejection.body_text(),
            ErrorContext::new()
                .with_field_path("request")
                .with_source("http_api"),
        )
    })?;
    Ok(Json(gateway.handle(request).await?))
}

async fn health(State(gateway): State<Gateway>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "backends": gateway.backends(),
        "cacheBackend": gateway.cache().backend_name(),
    }))
}

async fn stats(State(gateway): State<Gateway>) -> impl IntoResponse {
    Json(gateway.stats())
}

/// Serve the API on `addr` until `shutdown` is cancelled.
pub async fn serve(gateway: Gateway, addr: SocketAddr, shutdown: CancellationToken) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "agent gateway listening");
    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

//! HTTP transport: SSE event stream plus a JSON-RPC message-post endpoint, a CORS
//! layer, and health/version endpoints. One dual-endpoint pattern only (no
//! Streamable-HTTP single-endpoint variant, no Last-Event-ID replay buffer — the
//! session's queue is the only buffer, and it has exactly one writer).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use futures::FutureExt;
use serde::Deserialize;
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::protocol::{self, JsonRpcRequest, JsonRpcResponse};
use crate::session::{EnqueueError, SessionManager};
use crate::tools::{McpTool, ToolContext};

/// Shared state threaded through every handler.
pub struct AppState {
    pub tools: Vec<Box<dyn McpTool>>,
    pub ctx: ToolContext,
    pub sessions: Arc<SessionManager>,
    pub config: Config,
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session_id: Option<String>,
}

/// Build the full router: the SSE/message pair, CORS, tracing, and the auxiliary
/// health/version endpoints.
#[must_use]
pub fn build_router(tools: Vec<Box<dyn McpTool>>, ctx: ToolContext, sessions: Arc<SessionManager>, config: Config) -> Router {
    let max_body_bytes = config.max_body_bytes;
    let cors = build_cors_layer(&config);
    let state = Arc::new(AppState { tools, ctx, sessions, config });

    Router::new()
        .route("/mcp/v1/sse", get(handle_sse))
        .route("/mcp/v1/message", post(handle_message))
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready))
        .route("/version", get(version))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// In production, allow only the configured base URL's origin; otherwise allow any
/// `localhost`/`127.0.0.1` origin regardless of port, which is what local agent
/// clients actually run on.
fn build_cors_layer(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods([Method::GET, Method::POST]).allow_headers(Any);
    if config.production_mode {
        match config.base_url.parse::<HeaderValue>() {
            Ok(origin) => layer.allow_origin(origin),
            Err(_) => layer.allow_origin(AllowOrigin::exact(HeaderValue::from_static("null"))),
        }
    } else {
        layer.allow_origin(AllowOrigin::predicate(|origin, _| {
            origin.to_str().map(|s| s.contains("://localhost") || s.contains("://127.0.0.1")).unwrap_or(false)
        }))
    }
}

async fn health_live() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "live" }))
}

async fn health_ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let session_count = state.sessions.session_count().await;
    Json(serde_json::json!({
        "status": "ready",
        "sessions": session_count,
        "tools": state.tools.len(),
        "database": state.config.has_database(),
    }))
}

async fn version() -> impl IntoResponse {
    Json(serde_json::json!({ "name": "guardrail-gateway", "version": env!("CARGO_PKG_VERSION") }))
}

/// `GET /mcp/v1/sse`: opens a session, immediately announces the message endpoint
/// the client must POST to, then streams keep-alive comments and every queued
/// tool-call response in enqueue order until the connection drops.
async fn handle_sse(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (session, rx) = state.sessions.create(None, crate::session::AgentKind::Other, None).await;
    state.ctx.metrics.session_created();
    state
        .ctx
        .audit
        .emit(crate::models::AuditEvent::new(
            "session-created",
            Some(session.id.clone()),
            serde_json::json!({ "via": "sse" }),
        ))
        .await;

    let endpoint_url = format!("{}/mcp/v1/message?session_id={}", state.config.base_url, session.id);
    tracing::info!(session_id = %session.id, "opened SSE connection");

    let endpoint_event = stream::once(async move { Ok::<_, Infallible>(Event::default().event("endpoint").data(endpoint_url)) });

    let live_stream =
        ReceiverStream::new(rx).map(|payload| Ok::<_, Infallible>(Event::default().event("message").data(payload)));

    let stream: std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>> =
        Box::pin(endpoint_event.chain(live_stream));

    (
        [
            ("X-Accel-Buffering", "no"),
            ("Cache-Control", "no-cache, no-store, must-revalidate"),
            ("Connection", "keep-alive"),
            ("X-Content-Type-Options", "nosniff"),
            ("X-Frame-Options", "DENY"),
            ("Referrer-Policy", "strict-origin-when-cross-origin"),
        ],
        Sse::new(stream).keep_alive(KeepAlive::new().interval(crate::config::defaults::SSE_KEEP_ALIVE)),
    )
}

/// `POST /mcp/v1/message?session_id=...`: validates the session exists, dispatches the
/// request, and either inlines the JSON-RPC response in this reply (sessions with no
/// bound SSE stream, i.e. pure request/response mode) or enqueues it onto the session's
/// SSE stream (returning `202 Accepted` immediately, with the response arriving over
/// SSE). A full or already-closed stream queue is reported back as a capacity error
/// rather than silently dropped.
async fn handle_message(State(state): State<Arc<AppState>>, Query(query): Query<SessionQuery>, body: Bytes) -> Response {
    let Some(session_id) = query.session_id else {
        return jsonrpc_error_response(StatusCode::BAD_REQUEST, None, -32000, "Missing session_id");
    };
    let Some(session) = state.sessions.lookup(&session_id).await else {
        return jsonrpc_error_response(StatusCode::NOT_FOUND, None, -32000, format!("Unknown session: {session_id}"));
    };

    let req: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => return jsonrpc_error_response(StatusCode::BAD_REQUEST, None, -32700, format!("Parse error: {e}")),
    };

    let is_notification = req.id.is_none();
    let response = dispatch(&req, &state).await;

    if is_notification {
        return StatusCode::ACCEPTED.into_response();
    }

    if !session.has_stream() {
        return Json(response).into_response();
    }

    let payload = serde_json::to_string(&response).unwrap_or_default();
    match session.enqueue(payload, crate::config::defaults::ENQUEUE_TIMEOUT).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(EnqueueError::Busy) => {
            tracing::warn!(session_id = %session_id, "session queue full, rejecting enqueue");
            jsonrpc_error_response(StatusCode::SERVICE_UNAVAILABLE, response.id.clone(), -32000, "Session busy")
        }
        Err(EnqueueError::Closed) => {
            tracing::warn!(session_id = %session_id, "session stream closed, rejecting enqueue");
            jsonrpc_error_response(StatusCode::GONE, response.id.clone(), -32000, "Session closed")
        }
    }
}

fn jsonrpc_error_response(status: StatusCode, id: Option<Value>, code: i32, message: impl Into<String>) -> Response {
    (status, Json(JsonRpcResponse::error(id, code, message))).into_response()
}

/// Dispatch through the shared protocol handler, recovering from any panic inside a
/// tool so a single bad handler can never take the whole connection down.
async fn dispatch(req: &JsonRpcRequest, state: &AppState) -> JsonRpcResponse {
    let id = req.id.clone();
    let outcome = std::panic::AssertUnwindSafe(protocol::handle_request(req, &state.tools, &state.ctx))
        .catch_unwind()
        .await;
    match outcome {
        Ok(response) => response,
        Err(_) => {
            tracing::error!(method = %req.method, "handler panicked, recovered at transport ingress");
            JsonRpcResponse::error(id, -32603, "internal error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::GatewayMetrics;
    use crate::storage::Storage;
    use crate::validation::ValidationEngine;

    fn test_state() -> Arc<AppState> {
        let storage = Arc::new(Storage::in_memory());
        let validation = Arc::new(ValidationEngine::new(storage.rules.clone(), Duration::from_secs(60)));
        let sessions = Arc::new(SessionManager::new(Duration::from_secs(60), 100));
        let ctx = ToolContext::new(storage, validation, Arc::clone(&sessions), Arc::new(GatewayMetrics::new()));
        Arc::new(AppState { tools: crate::tools::register_all_tools(), ctx, sessions, config: Config::for_testing() })
    }

    #[tokio::test]
    async fn dispatch_recovers_from_unknown_method() {
        let state = test_state();
        let req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: "nonexistent".to_string(),
            params: serde_json::json!({}),
            id: Some(serde_json::json!(1)),
        };
        let response = dispatch(&req, &state).await;
        assert!(response.error.is_some());
    }

    #[tokio::test]
    async fn message_endpoint_rejects_unknown_session() {
        let state = test_state();
        let body = Bytes::from_static(br#"{"jsonrpc":"2.0","method":"ping","id":1}"#);
        let response = handle_message(
            State(state),
            Query(SessionQuery { session_id: Some("sess_does_not_exist".to_string()) }),
            body,
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn message_endpoint_inlines_response_for_streamless_session() {
        let state = test_state();
        let session = state.sessions.create_detached(None, crate::session::AgentKind::Other, None).await;
        let body = Bytes::from_static(br#"{"jsonrpc":"2.0","method":"ping","id":1}"#);
        let response =
            handle_message(State(Arc::clone(&state)), Query(SessionQuery { session_id: Some(session.id.clone()) }), body)
                .await
                .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["result"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn message_endpoint_rejects_malformed_body() {
        let state = test_state();
        let session = state.sessions.create_detached(None, crate::session::AgentKind::Other, None).await;
        let body = Bytes::from_static(b"not json");
        let response =
            handle_message(State(state), Query(SessionQuery { session_id: Some(session.id.clone()) }), body).await.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["error"]["code"], serde_json::json!(-32700));
    }

    #[tokio::test]
    async fn message_endpoint_reports_busy_queue_as_capacity_error() {
        let storage = Arc::new(Storage::in_memory());
        let validation = Arc::new(ValidationEngine::new(storage.rules.clone(), Duration::from_secs(60)));
        let sessions = Arc::new(SessionManager::new(Duration::from_secs(60), 1));
        let ctx = ToolContext::new(storage, validation, Arc::clone(&sessions), Arc::new(GatewayMetrics::new()));
        let state =
            Arc::new(AppState { tools: crate::tools::register_all_tools(), ctx, sessions: Arc::clone(&sessions), config: Config::for_testing() });
        let (session, _rx) = sessions.create(None, crate::session::AgentKind::Other, None).await;
        session.enqueue("already queued".to_string(), Duration::from_millis(50)).await.unwrap();

        let body = Bytes::from_static(br#"{"jsonrpc":"2.0","method":"ping","id":1}"#);
        let response =
            handle_message(State(state), Query(SessionQuery { session_id: Some(session.id.clone()) }), body).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["error"]["code"], serde_json::json!(-32000));
    }
}

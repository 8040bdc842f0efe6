//! Callscope HTTP API
//!
//! Axum server exposing the RAG session next to the Unix socket IPC server.
//! Each endpoint is a thin axum handler over an inner function returning
//! `(StatusCode, serde_json::Value)`; the inner functions route through the
//! IPC dispatcher so both transports behave the same.
//!
//! Endpoints:
//! - GET    /health         liveness plus index status
//! - GET    /version        server version info
//! - GET    /index          index status and counts
//! - POST   /index/rebuild  load-or-build, or force a rebuild
//! - DELETE /index          remove the persisted index
//! - POST   /search         top-k similarity search
//! - POST   /chat           whole answer (RAG or direct mode)
//! - POST   /chat/stream    answer as server-sent events

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use callscope_core::ipc::{CallscopeRequest, CallscopeResponse, ChatMode};
use callscope_core::{ConversationTurn, RagError, RagSession};
use futures::StreamExt;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub session: Arc<RagSession>,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/index", get(index_info_handler).delete(index_clear_handler))
        .route("/index/rebuild", post(index_rebuild_handler))
        .route("/search", post(search_handler))
        .route("/chat", post(chat_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .with_state(state)
}

/// Serve until the shutdown signal fires.
pub async fn start_http_server(
    session: Arc<RagSession>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let http = session.config().http.clone();
    let addr = format!("{}:{}", http.host, http.port);
    let app = build_router(Arc::new(HttpState { session }));

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Callscope HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RebuildRequest {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequestBody {
    pub query: Option<String>,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    #[serde(default)]
    pub mode: ChatMode,
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

pub async fn health_inner(session: &RagSession) -> (StatusCode, serde_json::Value) {
    let info = session.info().await;
    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "index": info,
            "socket": session.config().service.socket_path,
        }),
    )
}

/// Pure, no IO.
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "callscope/1",
    })
}

pub async fn index_info_inner(session: &RagSession) -> (StatusCode, serde_json::Value) {
    dispatch(session, CallscopeRequest::Info).await
}

pub async fn index_rebuild_inner(
    session: &RagSession,
    req: RebuildRequest,
) -> (StatusCode, serde_json::Value) {
    dispatch(session, CallscopeRequest::Rebuild { force: req.force }).await
}

pub async fn index_clear_inner(session: &RagSession) -> (StatusCode, serde_json::Value) {
    dispatch(session, CallscopeRequest::Clear).await
}

/// A blank query is passed through and yields an empty result list.
pub async fn search_inner(session: &RagSession, req: SearchRequest) -> (StatusCode, serde_json::Value) {
    let Some(query) = req.query else {
        return missing_query();
    };

    let start = Instant::now();
    let (status, mut body) = dispatch(
        session,
        CallscopeRequest::Search {
            query,
            limit: req.limit,
        },
    )
    .await;

    if status == StatusCode::OK {
        if let Some(obj) = body.as_object_mut() {
            obj.insert(
                "took_ms".to_string(),
                serde_json::json!(start.elapsed().as_millis() as u64),
            );
        }
    }
    (status, body)
}

pub async fn chat_inner(session: &RagSession, req: ChatRequestBody) -> (StatusCode, serde_json::Value) {
    let query = match required_query(req.query) {
        Ok(q) => q,
        Err(rejection) => return rejection,
    };

    dispatch(
        session,
        CallscopeRequest::Chat {
            query,
            history: req.history,
            mode: req.mode,
        },
    )
    .await
}

async fn dispatch(session: &RagSession, request: CallscopeRequest) -> (StatusCode, serde_json::Value) {
    let response = crate::router::handle_request(request, session).await;
    match response_to_http(response) {
        Ok(data) => (StatusCode::OK, data),
        Err(rejection) => rejection,
    }
}

fn required_query(query: Option<String>) -> std::result::Result<String, (StatusCode, serde_json::Value)> {
    match query {
        Some(q) if !q.trim().is_empty() => Ok(q),
        _ => Err(missing_query()),
    }
}

fn missing_query() -> (StatusCode, serde_json::Value) {
    (
        StatusCode::BAD_REQUEST,
        serde_json::json!({
            "error": "query field is required",
            "status": "error",
        }),
    )
}

// ============================================================================
// Axum handlers, delegating to the inner functions
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.session).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn index_info_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = index_info_inner(&state.session).await;
    (status, Json(body))
}

pub async fn index_rebuild_handler(
    State(state): State<Arc<HttpState>>,
    body: Option<Json<RebuildRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let (status, body) = index_rebuild_inner(&state.session, req).await;
    (status, Json(body))
}

pub async fn index_clear_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = index_clear_inner(&state.session).await;
    (status, Json(body))
}

pub async fn search_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<SearchRequest>,
) -> impl IntoResponse {
    let (status, body) = search_inner(&state.session, req).await;
    (status, Json(body))
}

pub async fn chat_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<ChatRequestBody>,
) -> impl IntoResponse {
    let (status, body) = chat_inner(&state.session, req).await;
    (status, Json(body))
}

/// One `data:` event per chunk, an `error` event if the provider fails
/// mid-answer, then a final `done` event.
pub async fn chat_stream_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<ChatRequestBody>,
) -> Response {
    let query = match required_query(req.query) {
        Ok(q) => q,
        Err((status, body)) => return (status, Json(body)).into_response(),
    };

    let stream = match req.mode {
        ChatMode::Rag => state.session.respond_stream(&query, &req.history).await,
        ChatMode::Direct => state.session.respond_direct_stream(&query, &req.history).await,
    };

    let chunks = match stream {
        Ok(chunks) => chunks,
        Err(e) => {
            tracing::warn!(error = %e, kind = e.kind(), "Streaming chat failed to start");
            return (status_for(e.kind()), Json(error_body(&e))).into_response();
        }
    };

    let events = chunks
        .map(|chunk| match chunk {
            Ok(text) => Event::default().data(sse_data(&text)),
            Err(e) => {
                tracing::warn!(error = %e, "Chat stream interrupted");
                Event::default().event("error").data(sse_data(&e.to_string()))
            }
        })
        .chain(futures::stream::once(async {
            Event::default().event("done").data("[DONE]")
        }))
        .map(Ok::<_, Infallible>);

    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

// ============================================================================
// Helpers
// ============================================================================

/// SSE lines end at `\n`, `\r` or `\r\n`; normalise to `\n` so each line
/// becomes its own `data:` field.
fn sse_data(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// HTTP status for a `RagError::kind` tag.
pub fn status_for(kind: &str) -> StatusCode {
    match kind {
        "retriever_uninitialized" => StatusCode::SERVICE_UNAVAILABLE,
        "embedding_provider" | "chat_provider" => StatusCode::BAD_GATEWAY,
        "corpus_empty" | "index_busy" => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(error: &RagError) -> serde_json::Value {
    serde_json::json!({
        "error": error.to_string(),
        "kind": error.kind(),
        "status": "error",
    })
}

/// Convert an IPC `CallscopeResponse` into an HTTP body, or a status and
/// error body.
pub fn response_to_http(
    response: CallscopeResponse,
) -> std::result::Result<serde_json::Value, (StatusCode, serde_json::Value)> {
    if response.is_ok() {
        return Ok(response.data.unwrap_or(serde_json::json!({})));
    }

    let status = response
        .kind
        .as_deref()
        .map(status_for)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Err((
        status,
        serde_json::json!({
            "error": response.error.unwrap_or_else(|| "unknown error".to_string()),
            "kind": response.kind,
            "status": "error",
        }),
    ))
}

// ============================================================================
// Unit Tests
// ============================================================================

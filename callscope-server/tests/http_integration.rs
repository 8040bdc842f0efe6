//! HTTP integration tests for the Callscope API.
//!
//! Sessions run over temp directories with in-process embedding and chat
//! backends. Inner functions are called directly; full handler dispatch goes
//! through the router with `oneshot`.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use callscope_server::http::{
    build_router, chat_inner, health_inner, index_rebuild_inner, search_inner, ChatRequestBody,
    HttpState, RebuildRequest, SearchRequest,
};
use callscope_core::ipc::ChatMode;
use serde_json::json;
use tower::ServiceExt;

use common::{make_session, make_session_with_reply, record, sample_records, REPLY};

async fn send(
    app: axum::Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn send_json(
    app: axum::Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let (status, bytes) = send(app, method, uri, body).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

// ===========================================================================
// Health and version
// ===========================================================================

#[tokio::test]
async fn test_health_reports_index_status() {
    let dir = tempfile::tempdir().unwrap();
    let session = make_session(dir.path(), 5, sample_records());

    let (status, body) = health_inner(&session).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["index"]["status"], "ABSENT");
    assert!(body["socket"].is_string(), "socket path must be present");
}

#[tokio::test]
async fn test_version_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(Arc::new(HttpState {
        session: make_session(dir.path(), 5, vec![]),
    }));

    let (status, json) = send_json(app, "GET", "/version", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["version"].is_string());
    assert_eq!(json["protocol"], "callscope/1");
}

// ===========================================================================
// Index lifecycle
// ===========================================================================

#[tokio::test]
async fn test_rebuild_then_info_ready() {
    let dir = tempfile::tempdir().unwrap();
    let session = make_session(dir.path(), 5, sample_records().into_iter().take(3).collect());
    let app = build_router(Arc::new(HttpState {
        session: session.clone(),
    }));

    let (status, body) = send_json(app.clone(), "POST", "/index/rebuild", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK, "rebuild failed: {}", body);
    assert_eq!(body["documents"], 3);
    assert_eq!(body["outcome"]["outcome"], "built");

    let (status, info) = send_json(app, "GET", "/index", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["status"], "READY");
    assert_eq!(info["document_count"], 3);
    assert_eq!(info["record_count"], 3);
}

#[tokio::test]
async fn test_rebuild_without_body_loads_existing_index() {
    let dir = tempfile::tempdir().unwrap();
    let first = make_session(dir.path(), 5, sample_records());
    assert!(first.initialize(false).await);

    let second = common::make_session(dir.path(), 5, vec![]);
    let app = build_router(Arc::new(HttpState { session: second }));

    let (status, body) = send_json(app, "POST", "/index/rebuild", None).await;
    assert_eq!(status, StatusCode::OK, "rebuild failed: {}", body);
    assert_eq!(body["outcome"]["outcome"], "loaded");
    assert_eq!(body["documents"], 5);
}

#[tokio::test]
async fn test_rebuild_empty_store_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let session = make_session(dir.path(), 5, vec![]);

    let (status, body) = index_rebuild_inner(&session, RebuildRequest { force: true }).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "corpus_empty");

    let info = session.info().await;
    assert_eq!(info.document_count, 0);
}

#[tokio::test]
async fn test_clear_index_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let session = make_session(dir.path(), 5, sample_records());
    assert!(session.initialize(false).await);
    let app = build_router(Arc::new(HttpState {
        session: session.clone(),
    }));

    let (status, body) = send_json(app.clone(), "DELETE", "/index", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cleared"], true);
    assert!(!dir.path().join("vector_store").exists());

    let (status, info) = send_json(app, "GET", "/index", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["status"], "ABSENT");
    assert_eq!(info["persisted"], false);
}

#[tokio::test]
async fn test_stale_after_new_records() {
    let dir = tempfile::tempdir().unwrap();
    let session = make_session(dir.path(), 5, sample_records());
    assert!(session.initialize(false).await);

    session
        .records()
        .append(vec![record(6, "Ana Lopez", "Billing", "Late fee waived")])
        .unwrap();

    let app = build_router(Arc::new(HttpState { session }));
    let (_, info) = send_json(app, "GET", "/index", None).await;
    assert_eq!(info["status"], "STALE");
    assert_eq!(info["document_count"], 5);
    assert_eq!(info["record_count"], 6);
}

// ===========================================================================
// Search
// ===========================================================================

#[tokio::test]
async fn test_search_bounded_by_limit() {
    let dir = tempfile::tempdir().unwrap();
    let session = make_session(dir.path(), 2, sample_records());
    assert!(session.initialize(false).await);

    let (status, body) = search_inner(
        &session,
        SearchRequest {
            query: Some("router internet connection".to_string()),
            limit: None,
        },
    )
    .await;

    assert_eq!(status, StatusCode::OK, "search failed: {}", body);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(body["count"], 2);
    assert!(body["took_ms"].is_u64());
    for result in results {
        assert!(result["metadata"]["call_id"].is_i64());
        assert!(result["score"].is_f64());
    }
}

#[tokio::test]
async fn test_search_missing_query_returns_400() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(Arc::new(HttpState {
        session: make_session(dir.path(), 5, sample_records()),
    }));

    let (status, body) = send_json(app, "POST", "/search", Some(json!({"limit": 3}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "query field is required");
}

#[tokio::test]
async fn test_search_blank_query_returns_no_results() {
    let dir = tempfile::tempdir().unwrap();
    let session = make_session(dir.path(), 3, sample_records());
    assert!(session.initialize(false).await);
    let app = build_router(Arc::new(HttpState { session }));

    let (status, body) = send_json(app, "POST", "/search", Some(json!({"query": "  "}))).await;
    assert_eq!(status, StatusCode::OK, "search failed: {}", body);
    assert_eq!(body["count"], 0);
    assert!(body["results"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_search_before_initialize_is_503() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(Arc::new(HttpState {
        session: make_session(dir.path(), 5, sample_records()),
    }));

    let (status, body) = send_json(app, "POST", "/search", Some(json!({"query": "billing"}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "retriever_uninitialized");
}

// ===========================================================================
// Chat
// ===========================================================================

#[tokio::test]
async fn test_chat_rag_mode_answers() {
    let dir = tempfile::tempdir().unwrap();
    let session = make_session(dir.path(), 3, sample_records());
    assert!(session.initialize(false).await);

    let (status, body) = chat_inner(
        &session,
        ChatRequestBody {
            query: Some("Who fixed the router?".to_string()),
            history: vec![],
            mode: ChatMode::Rag,
        },
    )
    .await;

    assert_eq!(status, StatusCode::OK, "chat failed: {}", body);
    assert_eq!(body["answer"], REPLY);
    assert_eq!(body["mode"], "rag");
    assert!(body["response_time"].is_f64());
}

#[tokio::test]
async fn test_chat_direct_mode_without_index() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(Arc::new(HttpState {
        session: make_session(dir.path(), 3, sample_records()),
    }));

    let (status, body) = send_json(
        app,
        "POST",
        "/chat",
        Some(json!({
            "query": "How many billing calls?",
            "mode": "direct",
            "history": [
                {"role": "user", "content": "hello"},
                {"role": "assistant", "content": "hi", "response_time": 0.3}
            ]
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "chat failed: {}", body);
    assert_eq!(body["answer"], REPLY);
    assert_eq!(body["mode"], "direct");
}

#[tokio::test]
async fn test_chat_stream_emits_chunks_and_done() {
    let dir = tempfile::tempdir().unwrap();
    let session = make_session(dir.path(), 3, sample_records());
    assert!(session.initialize(false).await);
    let app = build_router(Arc::new(HttpState { session }));

    let (status, bytes) = send(
        app,
        "POST",
        "/chat/stream",
        Some(json!({"query": "Who fixed the router?"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let text = String::from_utf8(bytes).unwrap();
    let chunks: Vec<&str> = text
        .lines()
        .filter_map(|l| l.strip_prefix("data:"))
        .map(|d| d.strip_prefix(' ').unwrap_or(d))
        .collect();

    assert_eq!(chunks.last(), Some(&"[DONE]"));
    assert!(text
        .lines()
        .any(|l| l.starts_with("event:") && l.trim_end().ends_with("done")));
    let answer: String = chunks[..chunks.len() - 1].concat();
    assert_eq!(answer, REPLY);
}

/// Reassemble SSE events as (event name, data) pairs.
fn sse_events(body: &str) -> Vec<(String, String)> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut event = "message".to_string();
            let mut data: Vec<&str> = Vec::new();
            for line in block.lines() {
                if let Some(name) = line.strip_prefix("event:") {
                    event = name.trim().to_string();
                } else if let Some(value) = line.strip_prefix("data:") {
                    data.push(value.strip_prefix(' ').unwrap_or(value));
                }
            }
            (!data.is_empty()).then(|| (event, data.join("\n")))
        })
        .collect()
}

#[tokio::test]
async fn test_chat_stream_carries_line_breaks() {
    let dir = tempfile::tempdir().unwrap();
    let session = make_session_with_reply(
        dir.path(),
        3,
        sample_records(),
        "Line one\r\nLine two\rLine three",
    );
    assert!(session.initialize(false).await);
    let app = build_router(Arc::new(HttpState { session }));

    let (status, bytes) = send(
        app,
        "POST",
        "/chat/stream",
        Some(json!({"query": "Summarise the billing calls"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let events = sse_events(&String::from_utf8(bytes).unwrap());
    let (last_name, last_data) = events.last().unwrap();
    assert_eq!((last_name.as_str(), last_data.as_str()), ("done", "[DONE]"));

    let answer: String = events[..events.len() - 1]
        .iter()
        .map(|(name, data)| {
            assert_eq!(name, "message");
            data.as_str()
        })
        .collect();
    assert_eq!(answer, "Line one\nLine two\nLine three");
}

#[tokio::test]
async fn test_chat_stream_uninitialized_is_503() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(Arc::new(HttpState {
        session: make_session(dir.path(), 3, sample_records()),
    }));

    let (status, body) = send_json(app, "POST", "/chat/stream", Some(json!({"query": "anything"}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "retriever_uninitialized");
}

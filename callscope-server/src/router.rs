use std::time::Instant;

use callscope_core::ipc::{CallscopeRequest, CallscopeResponse, ChatMode};
use callscope_core::{EnsureOutcome, RagSession};

/// Dispatch one IPC request against the session.
pub async fn handle_request(request: CallscopeRequest, session: &RagSession) -> CallscopeResponse {
    match request {
        CallscopeRequest::Ping => CallscopeResponse::pong(),
        CallscopeRequest::Info => {
            let info = session.info().await;
            CallscopeResponse::ok(serde_json::json!(info))
        }
        CallscopeRequest::Rebuild { force } => handle_rebuild(session, force).await,
        CallscopeRequest::Clear => match session.clear_index().await {
            Ok(()) => CallscopeResponse::ok(serde_json::json!({"cleared": true})),
            Err(e) => {
                tracing::error!(error = %e, "Index clear failed");
                CallscopeResponse::from_error(&e)
            }
        },
        CallscopeRequest::Search { query, limit } => {
            let k = limit.map(|l| l as usize);
            match session.search(&query, k).await {
                Ok(results) => CallscopeResponse::ok(serde_json::json!({
                    "query": query,
                    "count": results.len(),
                    "results": results,
                })),
                Err(e) => CallscopeResponse::from_error(&e),
            }
        }
        CallscopeRequest::Chat {
            query,
            history,
            mode,
        } => {
            let started = Instant::now();
            let answer = match mode {
                ChatMode::Rag => session.respond(&query, &history).await,
                ChatMode::Direct => session.respond_direct(&query, &history).await,
            };
            match answer {
                Ok(answer) => CallscopeResponse::ok(serde_json::json!({
                    "answer": answer,
                    "mode": mode,
                    "response_time": started.elapsed().as_secs_f64(),
                })),
                Err(e) => {
                    tracing::warn!(error = %e, kind = e.kind(), ?mode, "Chat request failed");
                    CallscopeResponse::from_error(&e)
                }
            }
        }
    }
}

/// `force` rebuilds unconditionally; otherwise load the persisted index or
/// build one if none is usable.
async fn handle_rebuild(session: &RagSession, force: bool) -> CallscopeResponse {
    let outcome = if force {
        session.rebuild().await.map(EnsureOutcome::Built)
    } else {
        session.try_initialize(false).await
    };

    match outcome {
        Ok(outcome) => {
            let info = session.info().await;
            CallscopeResponse::ok(serde_json::json!({
                "outcome": outcome,
                "documents": outcome.document_count(),
                "index": info,
            }))
        }
        Err(e) => {
            tracing::error!(error = %e, force, "Index rebuild failed");
            CallscopeResponse::from_error(&e)
        }
    }
}

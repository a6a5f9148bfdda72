//! Guarded dispatch of session-bound JSON-RPC messages.
//!
//! Every message post runs through [`dispatch_message`]: resolve the
//! session, invoke the MCP server, deliver the response onto the session's
//! event stream. Any fault raised along the way is normalized and
//! classified; the classification decides whether it is swallowed,
//! answered with a structured error, or logged as a defect. A failure
//! while reporting a failure must never crash the handler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::fault::{classify, classify_aggregate, AggregateFault, DispatchOutcome, Fault, FaultKind};
use crate::mcp::types::JsonRpcRequest;
use crate::server::AppState;
use crate::session::{ResponseState, SessionSender};

/// Dispatch a single JSON-RPC request bound to `session_id`.
///
/// `response` is the posting connection's response-started flag; for a
/// message post it stays unset until the returned response goes out, so a
/// classified fault can still be answered with a fresh structured error.
pub async fn dispatch_message(
    state: &AppState,
    session_id: &str,
    request: JsonRpcRequest,
    response: &ResponseState,
) -> Response {
    match try_dispatch(state, session_id, request).await {
        Ok(()) => accepted(),
        Err(fault) => report_fault(&fault, response, None)
            .await
            .unwrap_or_else(accepted),
    }
}

/// Dispatch a JSON-RPC batch. Each element is delivered from its own task;
/// per-task faults are collected into an [`AggregateFault`] and classified
/// as a group.
pub async fn dispatch_batch(
    state: &AppState,
    session_id: &str,
    requests: Vec<JsonRpcRequest>,
) -> Response {
    let mut tasks = JoinSet::new();
    for request in requests {
        let state = state.clone();
        let session_id = session_id.to_string();
        tasks.spawn(async move { try_dispatch(&state, &session_id, request).await });
    }

    let mut causes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(fault)) => causes.push(fault),
            Err(join_err) => causes.push(Fault::other(format!("dispatch task failed: {}", join_err))),
        }
    }

    if causes.is_empty() {
        accepted()
    } else {
        respond_to_aggregate(AggregateFault::new(causes))
    }
}

async fn try_dispatch(
    state: &AppState,
    session_id: &str,
    request: JsonRpcRequest,
) -> Result<(), Fault> {
    let sender = state.sessions.resolve(session_id)?;

    let response = state.mcp_server.handle_request(state, request).await;
    let frame = serde_json::to_value(&response)
        .map_err(|e| Fault::other(format!("failed to serialize response: {}", e)))?;

    sender.send(frame).await
}

/// Act on a classified fault.
///
/// Returns `Some(response)` when the connection's response has not started
/// and a structured error can still be sent; `None` when the response is
/// already streaming, in which case the fault is logged and, for session
/// expiry, emitted in-band over `stream` with any emission failure
/// suppressed.
pub async fn report_fault(
    fault: &Fault,
    response: &ResponseState,
    stream: Option<&SessionSender>,
) -> Option<Response> {
    let outcome = classify(fault);

    if !response.started() {
        return Some(match outcome {
            DispatchOutcome::PeerDisconnected => {
                let body = match fault.kind {
                    FaultKind::BrokenPipe | FaultKind::ConnectionReset => {
                        debug!("client connection reset before response: {}", fault);
                        json!({"error": "Connection reset", "code": -32000})
                    }
                    _ => {
                        debug!("session channel closed before response: {}", fault);
                        json!({"error": "Session closed", "code": -32000})
                    }
                };
                (StatusCode::GONE, Json(body)).into_response()
            }
            DispatchOutcome::SessionExpired { session_id } => {
                error!("session lookup failed for session_id: {}", session_id);
                (
                    StatusCode::GONE,
                    Json(json!({
                        "error": "Session expired or not found",
                        "code": -32001,
                        "message": "Please reconnect to /sse to establish a new session",
                        "reconnect": true,
                    })),
                )
                    .into_response()
            }
            DispatchOutcome::Fatal | DispatchOutcome::Success => {
                error!("unexpected error during dispatch: {:?}", fault);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "Unexpected error", "code": -32000})),
                )
                    .into_response()
            }
        });
    }

    match outcome {
        DispatchOutcome::PeerDisconnected => {
            debug!("client disconnected mid-stream: {}", fault);
        }
        DispatchOutcome::SessionExpired { session_id } => {
            error!("session lookup failed for session_id: {}", session_id);
            if let Some(sender) = stream {
                sender.send_lossy(session_expired_event(&session_id)).await;
            }
        }
        DispatchOutcome::Fatal | DispatchOutcome::Success => {
            error!("error after response started: {:?}", fault);
        }
    }
    None
}

/// Swallow an all-disconnect aggregate; anything else is a defect and is
/// surfaced as a 500 after logging the whole group.
fn respond_to_aggregate(aggregate: AggregateFault) -> Response {
    match classify_aggregate(&aggregate) {
        Some(DispatchOutcome::PeerDisconnected) => {
            debug!("client disconnected during batch dispatch: {}", aggregate);
            accepted()
        }
        _ => {
            error!("unclassified aggregate fault during batch dispatch: {:?}", aggregate);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Unexpected error", "code": -32000})),
            )
                .into_response()
        }
    }
}

/// JSON-RPC error frame emitted in-band when a session expires after its
/// stream has started.
pub fn session_expired_event(session_id: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {
            "code": -32001,
            "message": "Session expired. Please reconnect to /sse",
            "data": {"session_id": session_id, "reconnect": true},
        },
        "id": null,
    })
}

fn accepted() -> Response {
    (StatusCode::ACCEPTED, "Accepted").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::mcp::server::McpServer;
    use crate::session::SessionRegistry;
    use crate::tako::client::TakoClient;
    use std::sync::Arc;

    fn test_state() -> AppState {
        let config = Config {
            tako_api_url: "http://127.0.0.1:1".to_string(),
            public_base_url: "https://trytako.com".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            allowed_origins: vec![],
            origin_protection: false,
            api_key: None,
        };
        let tako = Arc::new(TakoClient::new(&config));
        AppState {
            config,
            tako,
            sessions: Arc::new(SessionRegistry::new()),
            mcp_server: Arc::new(McpServer::new()),
        }
    }

    fn rpc(id: i64, method: &str) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(id)),
            method: method.to_string(),
            params: Some(json!({})),
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn dispatch_delivers_response_on_session_stream() {
        let state = test_state();
        let (session_id, mut rx, _response) = state.sessions.open();

        let post_response = ResponseState::new();
        let http = dispatch_message(&state, &session_id.to_string(), rpc(1, "tools/list"), &post_response).await;
        assert_eq!(http.status(), StatusCode::ACCEPTED);

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame["id"], 1);
        assert!(!frame["result"]["tools"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_session_answers_410_with_reconnect_hint() {
        let state = test_state();
        let post_response = ResponseState::new();
        let http =
            dispatch_message(&state, "does-not-exist", rpc(1, "tools/list"), &post_response).await;
        assert_eq!(http.status(), StatusCode::GONE);

        let body = body_json(http).await;
        assert_eq!(body["code"], -32001);
        assert_eq!(body["reconnect"], true);
        assert_eq!(body["error"], "Session expired or not found");
    }

    #[tokio::test]
    async fn closed_session_channel_answers_410_session_closed() {
        let state = test_state();
        let (session_id, rx, _response) = state.sessions.open();
        drop(rx);

        let post_response = ResponseState::new();
        let http = dispatch_message(&state, &session_id.to_string(), rpc(1, "tools/list"), &post_response).await;
        assert_eq!(http.status(), StatusCode::GONE);

        let body = body_json(http).await;
        assert_eq!(body["error"], "Session closed");
        assert_eq!(body["code"], -32000);
    }

    #[tokio::test]
    async fn started_response_suppresses_disconnect_reporting() {
        let response = ResponseState::new();
        response.mark_started();

        let fault = Fault::closed_resource("session channel closed");
        assert!(report_fault(&fault, &response, None).await.is_none());
    }

    #[tokio::test]
    async fn started_response_emits_in_band_session_expiry() {
        let state = test_state();
        let (session_id, mut rx, response) = state.sessions.open();
        response.mark_started();
        let sender = state.sessions.resolve(&session_id.to_string()).unwrap();

        let expired = "0f8fad5b-d9cb-469f-a165-70867728950e";
        let fault = Fault::session_not_found(expired);
        assert!(report_fault(&fault, &response, Some(&sender)).await.is_none());

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame["error"]["code"], -32001);
        assert_eq!(frame["error"]["data"]["session_id"], expired);
        assert_eq!(frame["error"]["data"]["reconnect"], true);
        assert_eq!(frame["id"], Value::Null);
    }

    #[tokio::test]
    async fn in_band_emission_failure_is_suppressed() {
        let state = test_state();
        let (session_id, rx, response) = state.sessions.open();
        response.mark_started();
        let sender = state.sessions.resolve(&session_id.to_string()).unwrap();
        drop(rx);

        let fault = Fault::session_not_found("0f8fad5b-d9cb-469f-a165-70867728950e");
        // The stream is gone; emitting the in-band event must not raise.
        assert!(report_fault(&fault, &response, Some(&sender)).await.is_none());
    }

    #[tokio::test]
    async fn batch_to_dead_stream_is_swallowed() {
        let state = test_state();
        let (session_id, rx, _response) = state.sessions.open();
        drop(rx);

        let http = dispatch_batch(
            &state,
            &session_id.to_string(),
            vec![rpc(1, "tools/list"), rpc(2, "tools/list")],
        )
        .await;
        assert_eq!(http.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn batch_delivers_every_response() {
        let state = test_state();
        let (session_id, mut rx, _response) = state.sessions.open();

        let http = dispatch_batch(
            &state,
            &session_id.to_string(),
            vec![rpc(1, "tools/list"), rpc(2, "tools/list")],
        )
        .await;
        assert_eq!(http.status(), StatusCode::ACCEPTED);

        let mut ids = vec![
            rx.recv().await.unwrap()["id"].as_i64().unwrap(),
            rx.recv().await.unwrap()["id"].as_i64().unwrap(),
        ];
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn mixed_aggregate_surfaces_as_unexpected_error() {
        let aggregate = AggregateFault::new(vec![
            Fault::closed_resource("closed"),
            Fault::other("boom"),
        ]);
        let http = respond_to_aggregate(aggregate);
        assert_eq!(http.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(http).await;
        assert_eq!(body["error"], "Unexpected error");
        assert_eq!(body["code"], -32000);
    }
}

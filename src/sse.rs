//! SSE transport: one event stream per session plus the message POST
//! endpoint the stream advertises.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    Json as JsonExtractor,
};
use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dispatch::{dispatch_batch, dispatch_message},
    mcp::{
        constants::JsonRpcEnvelopes,
        types::{JsonRpcRequest, INVALID_REQUEST, PARSE_ERROR},
    },
    server::AppState,
    session::{ResponseState, SessionRegistry},
};

/// Removes the session from the registry when the SSE stream is dropped,
/// whether the client disconnected or the server shut the stream down.
struct StreamGuard {
    registry: Arc<SessionRegistry>,
    session_id: Uuid,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.registry.close(self.session_id);
        info!("SSE session closed: {}", self.session_id);
    }
}

/// SSE endpoint handler. Opens a session, advertises the message endpoint
/// for it, then relays every frame queued on the session channel.
pub async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let (session_id, mut receiver, response) = state.sessions.open();
    info!("SSE session opened: {}", session_id);

    let guard = StreamGuard {
        registry: Arc::clone(&state.sessions),
        session_id,
    };
    let endpoint = format!("/messages/?session_id={}", session_id);

    let stream = async_stream::stream! {
        let _guard = guard;

        // The endpoint event is the first byte on the wire; everything after
        // this point is mid-stream and faults can no longer change the
        // response head.
        response.mark_started();
        yield Ok(Event::default().event("endpoint").data(endpoint));

        while let Some(frame) = receiver.recv().await {
            yield Ok(Event::default().event("message").data(frame.to_string()));
        }
        debug!("session channel drained: {}", session_id);
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive-mcp"),
    )
}

#[derive(Debug, Deserialize)]
pub struct MessageParams {
    pub session_id: Option<String>,
}

/// HTTP POST endpoint for messages bound to an SSE session. Responses are
/// delivered over the session's event stream; this endpoint only
/// acknowledges receipt or reports a classified failure.
pub async fn message_handler(
    State(state): State<AppState>,
    Query(params): Query<MessageParams>,
    JsonExtractor(payload): JsonExtractor<Value>,
) -> Response {
    let session_id = match params.session_id {
        Some(id) => {
            debug!("received message for session {}", id);
            id
        }
        None => {
            // Delegate anyway; the registry lookup classifies this as an
            // expired session and answers with the reconnect hint.
            warn!("message posted without session_id");
            String::new()
        }
    };

    match payload {
        Value::Array(items) => {
            let mut requests = Vec::with_capacity(items.len());
            for item in items {
                match serde_json::from_value::<JsonRpcRequest>(item.clone()) {
                    Ok(request) if request.jsonrpc != "2.0" => {
                        return invalid_request(&item);
                    }
                    Ok(request) => requests.push(request),
                    Err(e) => return parse_error(&format!("Parse error: {}", e), &item),
                }
            }
            dispatch_batch(&state, &session_id, requests).await
        }
        other => {
            let request = match serde_json::from_value::<JsonRpcRequest>(other.clone()) {
                Ok(request) => request,
                Err(e) => return parse_error(&format!("Parse error: {}", e), &other),
            };
            if request.jsonrpc != "2.0" {
                return invalid_request(&other);
            }
            let response = ResponseState::new();
            dispatch_message(&state, &session_id, request, &response).await
        }
    }
}

fn parse_error(message: &str, payload: &Value) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(JsonRpcEnvelopes::error_response(
            PARSE_ERROR,
            message,
            payload.get("id").cloned(),
        )),
    )
        .into_response()
}

fn invalid_request(payload: &Value) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(JsonRpcEnvelopes::error_response(
            INVALID_REQUEST,
            "Request is not JSON-RPC 2.0",
            payload.get("id").cloned(),
        )),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stream_guard_closes_the_session_on_drop() {
        let registry = Arc::new(SessionRegistry::new());
        let (session_id, _rx, _response) = registry.open();
        assert!(registry.contains(session_id));

        drop(StreamGuard {
            registry: Arc::clone(&registry),
            session_id,
        });
        assert!(!registry.contains(session_id));
    }

    #[tokio::test]
    async fn parse_error_carries_the_request_id() {
        let payload = serde_json::json!({"id": 7, "method": 12});
        let response = parse_error("Parse error: bad frame", &payload);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], PARSE_ERROR);
        assert_eq!(body["id"], 7);
    }
}

//! End-to-end transport tests: a real server on a loopback port, an SSE
//! client, and message posts bound to the advertised session.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::timeout;

use tako_mcp::config::Config;
use tako_mcp::mcp::server::McpServer;
use tako_mcp::server::{build_router, AppState};
use tako_mcp::session::SessionRegistry;
use tako_mcp::tako::TakoClient;

async fn spawn_app() -> String {
    let config = Config {
        tako_api_url: "http://127.0.0.1:1".to_string(),
        public_base_url: "https://trytako.com".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        allowed_origins: Vec::new(),
        origin_protection: false,
        api_key: None,
    };
    let state = AppState {
        tako: Arc::new(TakoClient::new(&config)),
        config,
        sessions: Arc::new(SessionRegistry::new()),
        mcp_server: Arc::new(McpServer::new()),
    };
    let app = build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Incremental parser for the text/event-stream wire format.
struct SseReader<S> {
    stream: S,
    buffer: String,
}

impl<S> SseReader<S>
where
    S: Stream<Item = reqwest::Result<bytes::Bytes>> + Unpin,
{
    fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: String::new(),
        }
    }

    async fn next_event(&mut self) -> Option<(String, String)> {
        loop {
            if let Some(pos) = self.buffer.find("\n\n") {
                let raw: String = self.buffer.drain(..pos + 2).collect();
                let mut event = String::new();
                let mut data = String::new();
                for line in raw.lines() {
                    if let Some(rest) = line.strip_prefix("event:") {
                        event = rest.trim().to_string();
                    } else if let Some(rest) = line.strip_prefix("data:") {
                        data.push_str(rest.trim());
                    }
                }
                // Comment-only blocks are keep-alives
                if event.is_empty() && data.is_empty() {
                    continue;
                }
                return Some((event, data));
            }
            let chunk = self.stream.next().await?.ok()?;
            self.buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    }
}

async fn connect_sse(base: &str) -> (SseReader<impl Stream<Item = reqwest::Result<bytes::Bytes>> + Unpin>, String) {
    let response = reqwest::Client::new()
        .get(format!("{}/sse", base))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let mut reader = SseReader::new(response.bytes_stream());
    let (event, data) = timeout(Duration::from_secs(5), reader.next_event())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, "endpoint");
    assert!(data.starts_with("/messages/?session_id="));
    let session_id = data
        .rsplit("session_id=")
        .next()
        .unwrap()
        .to_string();
    (reader, session_id)
}

#[tokio::test]
async fn health_is_plain_text_ok() {
    let base = spawn_app().await;
    let response = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn detailed_health_reports_the_service() {
    let base = spawn_app().await;
    let body: Value = reqwest::get(format!("{}/health/detailed", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "tako-mcp-server");
    assert!(body["timestamp"].as_str().is_some());
}

#[tokio::test]
async fn sse_handshake_then_message_roundtrip() {
    let base = spawn_app().await;
    let (mut reader, session_id) = connect_sse(&base).await;

    let post = reqwest::Client::new()
        .post(format!("{}/messages/?session_id={}", base, session_id))
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
        .send()
        .await
        .unwrap();
    assert_eq!(post.status(), 202);

    let (event, data) = timeout(Duration::from_secs(5), reader.next_event())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, "message");
    let frame: Value = serde_json::from_str(&data).unwrap();
    assert_eq!(frame["id"], 1);
    assert!(!frame["result"]["tools"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn batch_post_delivers_every_response() {
    let base = spawn_app().await;
    let (mut reader, session_id) = connect_sse(&base).await;

    let post = reqwest::Client::new()
        .post(format!("{}/messages/?session_id={}", base, session_id))
        .json(&json!([
            {"jsonrpc": "2.0", "id": 1, "method": "tools/list"},
            {"jsonrpc": "2.0", "id": 2, "method": "prompts/list"},
        ]))
        .send()
        .await
        .unwrap();
    assert_eq!(post.status(), 202);

    let mut ids = Vec::new();
    for _ in 0..2 {
        let (event, data) = timeout(Duration::from_secs(5), reader.next_event())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, "message");
        let frame: Value = serde_json::from_str(&data).unwrap();
        ids.push(frame["id"].as_i64().unwrap());
    }
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2]);
}

#[tokio::test]
async fn unknown_session_post_answers_gone_with_reconnect() {
    let base = spawn_app().await;
    let response = reqwest::Client::new()
        .post(format!("{}/messages/?session_id=does-not-exist", base))
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 410);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], -32001);
    assert_eq!(body["reconnect"], true);
    assert_eq!(body["error"], "Session expired or not found");
}

#[tokio::test]
async fn post_without_session_id_answers_gone() {
    let base = spawn_app().await;
    let response = reqwest::Client::new()
        .post(format!("{}/messages", base))
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 410);
}

#[tokio::test]
async fn wrong_jsonrpc_version_answers_invalid_request() {
    let base = spawn_app().await;
    let response = reqwest::Client::new()
        .post(format!("{}/messages/?session_id=whatever", base))
        .json(&json!({"jsonrpc": "1.0", "id": 4, "method": "tools/list"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32600);
    assert_eq!(body["id"], 4);
}

#[tokio::test]
async fn batch_with_wrong_version_member_answers_invalid_request() {
    let base = spawn_app().await;
    let response = reqwest::Client::new()
        .post(format!("{}/messages/?session_id=whatever", base))
        .json(&json!([
            {"jsonrpc": "2.0", "id": 1, "method": "tools/list"},
            {"jsonrpc": "1.0", "id": 2, "method": "tools/list"},
        ]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32600);
    assert_eq!(body["id"], 2);
}

#[tokio::test]
async fn malformed_frame_answers_parse_error() {
    let base = spawn_app().await;
    let response = reqwest::Client::new()
        .post(format!("{}/messages/?session_id=whatever", base))
        .header("content-type", "application/json")
        .body(r#"{"id": 9, "method": 42}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32700);
    assert_eq!(body["id"], 9);
}

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderValue, Method},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::{
    config::Config,
    error::Result,
    mcp::server::McpServer,
    session::SessionRegistry,
    sse::{message_handler, sse_handler},
    tako::TakoClient,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub tako: Arc<TakoClient>,
    pub sessions: Arc<SessionRegistry>,
    pub mcp_server: Arc<McpServer>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(health_check))
        .route("/health/detailed", get(detailed_health_check))
        .route("/sse", get(sse_handler))
        .route("/messages", post(message_handler))
        .route("/messages/", post(message_handler))
        .layer(RequestBodyLimitLayer::new(1024 * 1024)) // 1 MiB
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::header::CACHE_CONTROL,
            axum::http::header::AUTHORIZATION,
            axum::http::header::HeaderName::from_static("x-api-key"),
            axum::http::header::HeaderName::from_static("last-event-id"),
            axum::http::header::HeaderName::from_static("mcp-protocol-version"),
        ]);

    if !config.origin_protection {
        return cors.allow_origin(tower_http::cors::Any);
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid allowed origin: {}", origin);
                None
            }
        })
        .collect();
    cors.allow_origin(origins)
}

pub async fn run_server(config: Config) -> Result<()> {
    let tako = Arc::new(TakoClient::new(&config));
    let sessions = Arc::new(SessionRegistry::new());
    let mcp_server = Arc::new(McpServer::new());

    let state = AppState {
        config: config.clone(),
        tako,
        sessions,
        mcp_server,
    };

    let app = build_router(state);

    let address = config.server_address();
    info!("Server listening on {}", address);

    let listener = tokio::net::TcpListener::bind(&address).await?;

    match axum::serve(listener, app).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => error!("Server error: {}", e),
    }

    Ok(())
}

/// Plain-text liveness probe.
async fn health_check() -> &'static str {
    "ok"
}

async fn detailed_health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "tako-mcp-server",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "sessions": state.sessions.len(),
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    use super::*;

    fn test_state() -> AppState {
        let config = Config {
            tako_api_url: "http://127.0.0.1:1".to_string(),
            public_base_url: "https://trytako.com".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            allowed_origins: Vec::new(),
            origin_protection: false,
            api_key: None,
        };
        AppState {
            tako: Arc::new(TakoClient::new(&config)),
            config,
            sessions: Arc::new(SessionRegistry::new()),
            mcp_server: Arc::new(McpServer::new()),
        }
    }

    #[tokio::test]
    async fn health_answers_plain_ok() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"ok");
    }

    #[tokio::test]
    async fn detailed_health_reports_service_and_sessions() {
        let state = test_state();
        let _open = state.sessions.open();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health/detailed")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "tako-mcp-server");
        assert_eq!(body["sessions"], 1);
        assert!(body["timestamp"].as_str().is_some());
    }

    #[tokio::test]
    async fn message_post_to_unknown_session_is_gone() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/messages/?session_id=not-a-session")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::GONE);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], -32001);
        assert_eq!(body["reconnect"], true);
    }

    #[tokio::test]
    async fn malformed_message_is_a_parse_error() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/messages?session_id=whatever")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"id":3,"method":42}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], -32700);
        assert_eq!(body["id"], 3);
    }
}

// SSE/HTTP transport
//
// Clients open an event stream with `GET <endpoint>`, learn their session's
// message URL from the first `endpoint` event, then POST JSON-RPC messages
// to it. Responses travel back over the stream as `message` events.

use crate::config::SseConfig;
use crate::middleware::auth::{require_api_key, ApiKeyAuth};
use anyhow::{Context, Result};
use axum::{
    extract::Request,
    http::{HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{sse::Event, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use mcpforge_mcp::Dispatcher;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

mod handlers;

pub type SessionSender = mpsc::UnboundedSender<Event>;

pub struct SseState {
    pub dispatcher: Arc<Dispatcher>,
    pub auth: Arc<ApiKeyAuth>,
    pub config: SseConfig,
    sessions: Mutex<HashMap<String, SessionSender>>,
}

impl SseState {
    pub fn new(dispatcher: Arc<Dispatcher>, auth: Arc<ApiKeyAuth>, config: SseConfig) -> Self {
        Self {
            dispatcher,
            auth,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn session_count(&self) -> usize {
        self.lock_sessions().len()
    }

    fn insert_session(&self, session_id: String, sender: SessionSender) {
        self.lock_sessions().insert(session_id, sender);
    }

    fn session(&self, session_id: &str) -> Option<SessionSender> {
        self.lock_sessions().get(session_id).cloned()
    }

    fn remove_session(&self, session_id: &str) {
        self.lock_sessions().remove(session_id);
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionSender>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Start the SSE server
pub async fn serve(addr: &str, state: Arc<SseState>) -> Result<()> {
    let endpoint = state.config.endpoint.clone();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("SSE server listening on http://{}{}", addr, endpoint);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the SSE router
pub fn create_router(state: Arc<SseState>) -> Router {
    let endpoint = state.config.endpoint.clone();

    let protected = Router::new()
        .route(&endpoint, get(handlers::open_stream))
        .route(&format!("{}/message", endpoint), post(handlers::post_message))
        .route_layer(middleware::from_fn_with_state(state.auth.clone(), require_api_key));

    Router::new()
        .route("/health", get(handlers::health_check))
        .merge(protected)
        // Middleware
        .layer(middleware::from_fn(answer_options))
        .layer(cors_layer(&state.config.cors_origin))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if origin == "*" {
        return layer.allow_origin(Any);
    }
    match HeaderValue::from_str(origin) {
        Ok(value) => layer.allow_origin(value),
        Err(_) => {
            tracing::warn!(origin, "Invalid CORS origin, allowing any");
            layer.allow_origin(Any)
        }
    }
}

/// Any OPTIONS request is answered with an empty 200.
async fn answer_options(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    next.run(request).await
}

/// API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }

    pub fn into_response_with(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

/// Unexpected failures inside a handler; rendered as 500 JSON.
pub struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_msg = self.0.to_string();
        let details = self.0.chain().skip(1).map(|e| e.to_string()).collect::<Vec<_>>().join(": ");

        let response = if details.is_empty() {
            ErrorResponse::new(error_msg)
        } else {
            ErrorResponse::with_details(error_msg, details)
        };

        response.into_response_with(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::auth::{ApiKeyConfig, AuthConfig};
    use axum::body::Body;
    use futures::StreamExt;
    use mcpforge_core::{CallArgs, ServerDeclaration, ServerDefinition, ToolDeclaration};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn state() -> Arc<SseState> {
        let definition: ServerDefinition<()> = ServerDefinition::builder()
            .server(ServerDeclaration::new("sse-test", "0.2.0"))
            .tool(ToolDeclaration::new("echo", "Echo input"), |_, args: CallArgs| async move {
                Ok(args.get(0).cloned().unwrap_or_default())
            })
            .build();
        let dispatcher = Arc::new(Dispatcher::new(definition, ()).unwrap());
        let auth = ApiKeyAuth::new(AuthConfig {
            enabled: true,
            keys: vec![ApiKeyConfig::new("secret")],
            ..AuthConfig::default()
        });
        Arc::new(SseState::new(dispatcher, Arc::new(auth), SseConfig::default()))
    }

    fn get_request(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri(uri)
            .header("origin", "http://client.test")
            .body(Body::empty())
            .unwrap()
    }

    fn post_request(uri: &str, body: impl Into<Body>) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("x-api-key", "secret")
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Read from an SSE body until one complete event is buffered.
    async fn next_event<S>(stream: &mut S, pending: &mut String) -> (String, String)
    where
        S: futures::Stream<Item = Result<axum::body::Bytes, axum::Error>> + Unpin,
    {
        loop {
            if let Some(end) = pending.find("\n\n") {
                let block: String = pending.drain(..end + 2).collect();
                let mut event = String::new();
                let mut data = String::new();
                for line in block.lines() {
                    if let Some(v) = line.strip_prefix("event: ") {
                        event = v.to_string();
                    } else if let Some(v) = line.strip_prefix("data: ") {
                        data = v.to_string();
                    }
                }
                if event.is_empty() && data.is_empty() {
                    continue;
                }
                return (event, data);
            }
            let chunk = stream.next().await.expect("stream ended").unwrap();
            pending.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    }

    #[tokio::test]
    async fn test_health_skips_auth() {
        let app = create_router(state());
        let response = app.oneshot(get_request("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        let body = body_json(response).await;
        assert_eq!(body, json!({"status": "ok", "server": "sse-test", "version": "0.2.0"}));
    }

    #[tokio::test]
    async fn test_stream_requires_auth() {
        let app = create_router(state());
        let response = app.oneshot(get_request("/sse")).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Unauthorized");
        assert!(body["requestId"].as_str().unwrap().starts_with("req_"));
    }

    #[tokio::test]
    async fn test_options_short_circuits() {
        let app = create_router(state());

        let plain = axum::http::Request::builder()
            .method(Method::OPTIONS)
            .uri("/sse/message")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(plain).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());

        let preflight = axum::http::Request::builder()
            .method(Method::OPTIONS)
            .uri("/sse/message")
            .header("origin", "http://client.test")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(preflight).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        let methods = response.headers()["access-control-allow-methods"].to_str().unwrap();
        assert!(methods.contains("POST"));
    }

    #[tokio::test]
    async fn test_post_to_unknown_session() {
        let app = create_router(state());
        let body = json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}).to_string();
        let response = app
            .oneshot(post_request("/sse/message?sessionId=missing", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_post_requires_auth() {
        let app = create_router(state());
        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/sse/message?sessionId=x")
            .body(Body::from("{}"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_session_flow() {
        let state = state();
        let app = create_router(state.clone());

        let response = app
            .clone()
            .oneshot(get_request("/sse?api_key=secret"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");

        let mut stream = response.into_body().into_data_stream();
        let mut pending = String::new();

        let (event, data) = next_event(&mut stream, &mut pending).await;
        assert_eq!(event, "endpoint");
        let session_id = data.strip_prefix("/sse/message?sessionId=").unwrap().to_string();
        assert!(uuid::Uuid::parse_str(&session_id).is_ok());
        assert_eq!(state.session_count(), 1);

        let url = format!("/sse/message?sessionId={}", session_id);
        let call = json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": {"name": "echo", "arguments": {"v": true}}
        });
        let response = app.clone().oneshot(post_request(&url, call.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let (event, data) = next_event(&mut stream, &mut pending).await;
        assert_eq!(event, "message");
        let message: Value = serde_json::from_str(&data).unwrap();
        assert_eq!(message["id"], 3);
        assert_eq!(message["result"]["content"][0]["text"], r#"{"v":true}"#);

        let response = app.clone().oneshot(post_request(&url, "{broken")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "Invalid request body");

        // Notifications are accepted but produce no event.
        let notification = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        let response = app.clone().oneshot(post_request(&url, notification.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        drop(stream);
        assert_eq!(state.session_count(), 0);

        let response = app.oneshot(post_request(&url, call.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

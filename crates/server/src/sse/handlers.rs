use super::{ApiResult, ErrorResponse, SseState};
use crate::middleware::auth::AuthContext;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Extension, Json,
};
use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<SseState>>) -> impl IntoResponse {
    let server = state.dispatcher.server();
    Json(serde_json::json!({
        "status": "ok",
        "server": server.name,
        "version": server.version,
    }))
}

/// Removes the session once its event stream is dropped.
struct SessionGuard {
    state: Arc<SseState>,
    session_id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.state.remove_session(&self.session_id);
        tracing::info!(session_id = %self.session_id, "SSE session closed");
    }
}

/// Open an event stream for a new session
pub async fn open_stream(
    State(state): State<Arc<SseState>>,
    Extension(auth): Extension<AuthContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = uuid::Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel();
    state.insert_session(session_id.clone(), tx);

    tracing::info!(session_id = %session_id, client_id = %auth.client_id, "SSE session opened");

    let message_url = format!("{}/message?sessionId={}", state.config.endpoint, session_id);
    let guard = SessionGuard { state, session_id };

    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok::<_, Infallible>(Event::default().event("endpoint").data(message_url));
        while let Some(event) = rx.recv().await {
            yield Ok(event);
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// Accept a client message and answer it over the session's stream
pub async fn post_message(
    State(state): State<Arc<SseState>>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> ApiResult<Response> {
    let Some(session_id) = query.session_id else {
        return Ok(ErrorResponse::new("Missing sessionId").into_response_with(StatusCode::BAD_REQUEST));
    };

    let Some(sender) = state.session(&session_id) else {
        return Ok(ErrorResponse::new("Session not found").into_response_with(StatusCode::NOT_FOUND));
    };

    let message: Value = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(session_id = %session_id, error = %e, "Rejected message body");
            return Ok(ErrorResponse::with_details("Invalid request body", e.to_string())
                .into_response_with(StatusCode::BAD_REQUEST));
        }
    };

    if let Some(response) = state.dispatcher.handle_value(message).await {
        let event = Event::default().event("message").json_data(&response)?;
        if sender.send(event).is_err() {
            state.remove_session(&session_id);
            return Err(anyhow::anyhow!("Session stream closed").into());
        }
    }

    Ok(StatusCode::ACCEPTED.into_response())
}

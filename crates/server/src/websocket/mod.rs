// WebSocket transport over a raw TCP listener
//
// The upgrade handshake and frame codec are implemented here rather than
// through a WebSocket library; see `handshake` and `frame`.

pub mod frame;
pub mod handshake;

use crate::config::WebSocketConfig;
use crate::middleware::auth::{ApiKeyAuth, AuthRequest};
use anyhow::{Context, Result};
use axum::http::StatusCode;
use bytes::{Buf, BytesMut};
use frame::{encode_text, Frame, FrameDecoder, OpCode, CLOSE_FRAME, PONG_FRAME};
use handshake::{http_response, json_response, parse_request_head, status_line, switching_protocols, RequestHead};
use mcpforge_mcp::protocol::JsonRpcRequest;
use mcpforge_mcp::Dispatcher;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const READ_CHUNK: usize = 8 * 1024;

pub struct WebSocketServer {
    dispatcher: Arc<Dispatcher>,
    auth: Arc<ApiKeyAuth>,
    config: WebSocketConfig,
}

impl WebSocketServer {
    pub fn new(dispatcher: Arc<Dispatcher>, auth: Arc<ApiKeyAuth>, config: WebSocketConfig) -> Self {
        Self {
            dispatcher,
            auth,
            config,
        }
    }

    pub async fn serve(self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        tracing::info!(
            "WebSocket server listening on ws://{}{}",
            listener.local_addr()?,
            self.config.endpoint
        );
        self.serve_listener(listener).await
    }

    /// Accept connections until the listener fails.
    pub async fn serve_listener(self, listener: TcpListener) -> Result<()> {
        let server = Arc::new(self);
        loop {
            let (stream, peer) = listener.accept().await.context("Failed to accept connection")?;
            let server = server.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream).await {
                    tracing::debug!(%peer, error = %e, "Connection ended with error");
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        let mut buffer = BytesMut::with_capacity(READ_CHUNK);
        let head = loop {
            match parse_request_head(&buffer) {
                Ok(Some((head, consumed))) => {
                    buffer.advance(consumed);
                    break head;
                }
                Ok(None) => {}
                Err(e) => {
                    stream
                        .write_all(&http_response(StatusCode::BAD_REQUEST, "text/plain", b"Bad Request"))
                        .await?;
                    return Err(e.into());
                }
            }
            if stream.read_buf(&mut buffer).await? == 0 {
                return Ok(());
            }
        };

        if !head.is_websocket_upgrade() {
            return self.serve_plain_http(&mut stream, &head).await;
        }

        if head.path() != self.config.endpoint {
            tracing::debug!(path = %head.path(), "Upgrade requested on unknown path");
            return reject(&mut stream, StatusCode::NOT_FOUND).await;
        }

        let context = match self.auth.authenticate(&auth_request(&head)).await {
            Ok(context) => context,
            Err(_) => return reject(&mut stream, StatusCode::UNAUTHORIZED).await,
        };

        let Some(key) = head.websocket_key() else {
            return reject(&mut stream, StatusCode::BAD_REQUEST).await;
        };

        stream.write_all(switching_protocols(key).as_bytes()).await?;
        tracing::info!(client_id = %context.client_id, "WebSocket connection upgraded");

        self.run_session(stream, buffer).await;
        Ok(())
    }

    async fn serve_plain_http(&self, stream: &mut TcpStream, head: &RequestHead) -> Result<()> {
        let response = match head.path() {
            "/health" => json_response(StatusCode::OK, &self.health()),
            "/" => match self.auth.authenticate(&auth_request(head)).await {
                Ok(_) => json_response(StatusCode::OK, &self.info()),
                Err(rejection) => json_response(StatusCode::UNAUTHORIZED, &rejection.body()),
            },
            _ => http_response(StatusCode::UPGRADE_REQUIRED, "text/plain", b"Upgrade Required"),
        };

        stream.write_all(&response).await?;
        stream.shutdown().await?;
        Ok(())
    }

    fn health(&self) -> Value {
        let server = self.dispatcher.server();
        json!({
            "status": "ok",
            "server": server.name,
            "version": server.version,
        })
    }

    fn info(&self) -> Value {
        let server = self.dispatcher.server();
        json!({
            "name": server.name,
            "version": server.version,
            "description": server.description,
            "transport": "websocket",
            "endpoint": self.config.endpoint,
            "capabilities": self.dispatcher.capabilities(),
        })
    }

    /// Drive one upgraded connection until the peer closes it.
    ///
    /// Frames are decoded strictly in arrival order. Text frames are
    /// dispatched on their own tasks, so responses may complete out of
    /// order; clients correlate them by request id.
    async fn run_session(&self, stream: TcpStream, leftover: BytesMut) {
        let session_id = uuid::Uuid::new_v4().to_string();
        let (mut reader, mut writer) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if writer.write_all(&bytes).await.is_err() {
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        let established = JsonRpcRequest::notification("connection/established", json!({ "sessionId": session_id }));
        send_json(&tx, &established);
        tracing::info!(session_id = %session_id, "WebSocket session established");

        let mut decoder = FrameDecoder::new(self.config.max_frame_size);
        decoder.extend(&leftover);
        let mut chunk = vec![0u8; READ_CHUNK];

        'session: loop {
            loop {
                match decoder.next_frame() {
                    Ok(Some(frame)) => {
                        if !self.handle_frame(frame, &tx) {
                            break 'session;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, error = %e, "Closing session");
                        let _ = tx.send(CLOSE_FRAME.to_vec());
                        break 'session;
                    }
                }
            }

            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => decoder.extend(&chunk[..n]),
                Err(e) => {
                    tracing::debug!(session_id = %session_id, error = %e, "Socket read failed");
                    break;
                }
            }
        }

        tracing::info!(session_id = %session_id, "WebSocket session closed");
    }

    /// Returns false once the session should end.
    fn handle_frame(&self, frame: Frame, tx: &mpsc::UnboundedSender<Vec<u8>>) -> bool {
        match frame.opcode {
            OpCode::Text if !frame.fin => {
                tracing::debug!(len = frame.payload.len(), "Ignoring fragmented text frame");
                true
            }
            OpCode::Text => {
                let text = String::from_utf8_lossy(&frame.payload).into_owned();
                let dispatcher = self.dispatcher.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(response) = dispatcher.handle_message(&text).await {
                        send_json(&tx, &response);
                    }
                });
                true
            }
            OpCode::Ping => {
                let _ = tx.send(PONG_FRAME.to_vec());
                true
            }
            OpCode::Close => {
                let _ = tx.send(CLOSE_FRAME.to_vec());
                false
            }
            other => {
                tracing::debug!(opcode = other.as_u8(), "Ignoring frame");
                true
            }
        }
    }
}

fn auth_request(head: &RequestHead) -> AuthRequest {
    AuthRequest::new(head.method.clone(), head.uri.clone(), head.headers.clone())
}

/// Write a bare status line and drop the connection.
async fn reject(stream: &mut TcpStream, status: StatusCode) -> Result<()> {
    stream.write_all(status_line(status).as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

fn send_json<T: serde::Serialize>(tx: &mpsc::UnboundedSender<Vec<u8>>, message: &T) {
    match serde_json::to_string(message) {
        Ok(text) => {
            let _ = tx.send(encode_text(&text));
        }
        Err(e) => tracing::error!(error = %e, "Failed to serialize outgoing message"),
    }
}

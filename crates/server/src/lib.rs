// HTTP-facing transports for mcpforge servers: SSE, raw WebSocket and the
// API-key authentication shared by both

pub mod config;
pub mod demo;
pub mod middleware;
pub mod sse;
pub mod websocket;

pub use config::{ServerConfig, TransportKind};

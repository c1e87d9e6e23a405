use crate::middleware::auth::AuthConfig;
use anyhow::{Context, Result};
use mcpforge_core::history::DEFAULT_HISTORY_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Sse,
    Websocket,
}

impl Default for TransportKind {
    fn default() -> Self {
        Self::Stdio
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub listen: ListenConfig,

    #[serde(default)]
    pub sse: SseConfig,

    #[serde(default)]
    pub websocket: WebSocketConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default)]
    pub transport: TransportKind,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ListenConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseConfig {
    #[serde(default = "default_sse_endpoint")]
    pub endpoint: String,

    /// Value of `Access-Control-Allow-Origin`; `*` allows any origin.
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

fn default_sse_endpoint() -> String {
    "/sse".to_string()
}

fn default_cors_origin() -> String {
    "*".to_string()
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            endpoint: default_sse_endpoint(),
            cors_origin: default_cors_origin(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    #[serde(default = "default_ws_endpoint")]
    pub endpoint: String,

    /// Largest frame payload a client may declare.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

fn default_ws_endpoint() -> String {
    "/ws".to_string()
}

fn default_max_frame_size() -> usize {
    16 * 1024 * 1024
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            endpoint: default_ws_endpoint(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file; a missing file yields defaults.
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            tracing::info!("Configuration file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path).context("Failed to read configuration file")?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse configuration file")
    }
}

use anyhow::Result;
use clap::Parser;
use mcpforge_core::CallHistory;
use mcpforge_mcp::{Dispatcher, McpServer};
use mcpforge_server::config::{ServerConfig, TransportKind};
use mcpforge_server::demo::{notes_definition, NotesService};
use mcpforge_server::middleware::{ApiKeyAuth, ApiKeyConfig};
use mcpforge_server::sse::{self, SseState};
use mcpforge_server::websocket::WebSocketServer;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "mcpforge")]
#[command(about = "Serve an MCP server over stdio, SSE or WebSocket", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "MCPFORGE_CONFIG", default_value = "mcpforge.toml")]
    config: PathBuf,

    /// Transport to serve
    #[arg(short, long, env = "MCPFORGE_TRANSPORT", value_enum)]
    transport: Option<TransportKind>,

    /// Host to bind to
    #[arg(long, env = "MCPFORGE_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "MCPFORGE_PORT")]
    port: Option<u16>,

    /// Require this API key on HTTP and WebSocket transports
    #[arg(long, env = "MCPFORGE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout belongs to the stdio transport.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "mcpforge=info,mcpforge_server=info,mcpforge_mcp=info,mcpforge_core=info,tower_http=debug".into()
            }),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    let args = Args::parse();
    let mut config = ServerConfig::load(&args.config)?;

    if let Some(transport) = args.transport {
        config.listen.transport = transport;
    }
    if let Some(host) = args.host {
        config.listen.host = host;
    }
    if let Some(port) = args.port {
        config.listen.port = port;
    }
    if let Some(key) = args.api_key {
        config.auth.enabled = true;
        config.auth.keys.push(ApiKeyConfig::new(key).name("cli"));
    }

    let history = Arc::new(CallHistory::new(config.history.capacity));
    let dispatcher = Arc::new(Dispatcher::new(notes_definition(), NotesService::default())?.with_history(history));
    let server = dispatcher.server();
    tracing::info!(
        "Starting {} v{} over {:?}",
        server.name,
        server.version,
        config.listen.transport
    );

    let addr = config.listen.addr();
    match config.listen.transport {
        TransportKind::Stdio => McpServer::new(dispatcher).start().await?,
        TransportKind::Sse => {
            let auth = Arc::new(ApiKeyAuth::new(config.auth.clone()));
            let state = Arc::new(SseState::new(dispatcher, auth, config.sse.clone()));
            sse::serve(&addr, state).await?
        }
        TransportKind::Websocket => {
            let auth = Arc::new(ApiKeyAuth::new(config.auth.clone()));
            WebSocketServer::new(dispatcher, auth, config.websocket.clone())
                .serve(&addr)
                .await?
        }
    }

    Ok(())
}

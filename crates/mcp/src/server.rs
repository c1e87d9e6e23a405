// MCP server over stdio

use crate::dispatcher::Dispatcher;
use crate::stdio;
use anyhow::Result;
use std::sync::Arc;

pub struct McpServer {
    dispatcher: Arc<Dispatcher>,
}

impl McpServer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Serve JSON-RPC over stdin/stdout until stdin closes.
    pub async fn start(&self) -> Result<()> {
        let server = self.dispatcher.server();
        tracing::info!(server = %server.name, version = %server.version, "MCP server started on stdio");
        stdio::serve_stdio(Arc::clone(&self.dispatcher)).await
    }
}

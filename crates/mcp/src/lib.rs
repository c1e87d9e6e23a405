// MCP (Model Context Protocol) protocol layer: wire types, the shared
// method-routing dispatcher and the stdio transport

pub mod dispatcher;
pub mod protocol;
pub mod server;
pub mod stdio;

pub use dispatcher::Dispatcher;
pub use server::McpServer;

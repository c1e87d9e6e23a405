// Core building blocks for mcpforge servers: declarations, explicit server
// definitions, URI templates and argument resolution

pub mod declaration;
pub mod definition;
pub mod error;
pub mod history;
pub mod resolver;
pub mod schema;
pub mod uri_template;

pub use declaration::*;
pub use definition::{BoundHandlers, Handler, Method, ServerDefinition, ServerDefinitionBuilder};
pub use error::{DeclarationError, McpError, McpResult, TemplateError};
pub use history::{CallHistory, CallHistoryEntry};
pub use resolver::{CallArgs, CallKind};
pub use uri_template::{match_uri, UriTemplate};

// Error taxonomy shared by the dispatcher and every transport

/// JSON-RPC error codes used on the wire.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const SERVER_ERROR: i32 = -32000;
}

/// Raised while turning a server definition into a running dispatcher.
///
/// These are fatal: a server with a broken definition never starts.
#[derive(Debug, thiserror::Error)]
pub enum DeclarationError {
    #[error("server definition has no server declaration (name/version)")]
    MissingServer,

    #[error("parameter index {index} of handler '{handler}' exceeds the limit of {max}")]
    ParameterIndex { handler: String, index: usize, max: usize },

    #[error("invalid URI template '{template}': {source}")]
    InvalidTemplate {
        template: String,
        #[source]
        source: TemplateError,
    },
}

/// Failure compiling a URI template.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("unterminated capture starting at byte {0}")]
    Unterminated(usize),

    #[error("capture name '{0}' is not a valid identifier")]
    BadName(String),

    #[error(transparent)]
    Regex(#[from] regex::Error),
}

/// Per-call failure reported back to the caller as a protocol error.
///
/// None of these are fatal to the server or to other connections.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("Parse error")]
    Parse,

    #[error("Invalid Request")]
    InvalidRequest,

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Unknown prompt: {0}")]
    UnknownPrompt(String),

    /// A user handler returned an error; its message is passed through verbatim.
    #[error("{0}")]
    Handler(String),
}

impl McpError {
    /// The JSON-RPC error code for this failure.
    pub fn code(&self) -> i32 {
        match self {
            Self::Parse => codes::PARSE_ERROR,
            Self::InvalidRequest => codes::INVALID_REQUEST,
            Self::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            Self::InvalidParams(_)
            | Self::UnknownTool(_)
            | Self::ResourceNotFound(_)
            | Self::UnknownPrompt(_) => codes::INVALID_PARAMS,
            Self::Handler(_) => codes::SERVER_ERROR,
        }
    }

    /// Wrap a handler failure, keeping only the outermost message.
    pub fn handler(err: anyhow::Error) -> Self {
        Self::Handler(err.to_string())
    }
}

pub type McpResult<T> = Result<T, McpError>;

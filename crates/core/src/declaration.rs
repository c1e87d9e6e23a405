// Declarations describing what a server exposes, independent of any call

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default MIME type for resources that do not declare one.
pub const DEFAULT_RESOURCE_MIME_TYPE: &str = "application/json";

/// Highest handler parameter position a binding may target.
pub const MAX_PARAMETER_INDEX: usize = 255;

/// Identifies the method a declaration is served by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandlerRef(pub String);

impl HandlerRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HandlerRef {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for HandlerRef {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Server identity advertised on `initialize` and `/health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDeclaration {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ServerDeclaration {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub input_schema: Option<serde_json::Value>,
    pub handler: HandlerRef,
}

impl ToolDeclaration {
    /// Declare a tool; the handler reference defaults to the tool name.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            handler: HandlerRef::new(name.clone()),
            name,
            description: description.into(),
            input_schema: None,
        }
    }

    pub fn input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn handler(mut self, handler: impl Into<HandlerRef>) -> Self {
        self.handler = handler.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDeclaration {
    pub uri_template: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: String,
    pub handler: HandlerRef,
}

impl ResourceDeclaration {
    /// Declare a resource; the handler reference defaults to the resource name.
    pub fn new(uri_template: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            uri_template: uri_template.into(),
            handler: HandlerRef::new(name.clone()),
            name,
            description: None,
            mime_type: DEFAULT_RESOURCE_MIME_TYPE.to_string(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn handler(mut self, handler: impl Into<HandlerRef>) -> Self {
        self.handler = handler.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

impl PromptArgument {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            required: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptDeclaration {
    pub name: String,
    pub description: String,
    pub arguments: Vec<PromptArgument>,
    pub handler: HandlerRef,
}

impl PromptDeclaration {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            handler: HandlerRef::new(name.clone()),
            name,
            description: description.into(),
            arguments: Vec::new(),
        }
    }

    pub fn argument(mut self, argument: PromptArgument) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn handler(mut self, handler: impl Into<HandlerRef>) -> Self {
        self.handler = handler.into();
        self
    }
}

/// How a positional parameter of a handler is filled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingKind {
    /// Receives the entire raw input object.
    WholeInput,
    /// Receives one capture extracted from the resource URI.
    UriParam(String),
    /// Receives one named prompt argument.
    PromptArg(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterBinding {
    pub handler: HandlerRef,
    pub index: usize,
    pub kind: BindingKind,
}

impl ParameterBinding {
    pub fn whole_input(handler: impl Into<HandlerRef>, index: usize) -> Self {
        Self {
            handler: handler.into(),
            index,
            kind: BindingKind::WholeInput,
        }
    }

    pub fn uri_param(handler: impl Into<HandlerRef>, index: usize, name: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            index,
            kind: BindingKind::UriParam(name.into()),
        }
    }

    pub fn prompt_arg(handler: impl Into<HandlerRef>, index: usize, name: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            index,
            kind: BindingKind::PromptArg(name.into()),
        }
    }
}

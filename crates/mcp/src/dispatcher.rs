//! The MCP method-routing table shared by every transport.
//!
//! A [`Dispatcher`] is built once per running server from a
//! [`ServerDefinition`] and the single instance its handlers run against.
//! Lookups are ordered: the first tool or prompt with a matching name, and
//! the first resource whose template matches structurally, wins.

use crate::protocol::{
    CallToolParams, CallToolResult, GetPromptParams, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ListChangedCapability, ListPromptsResult,
    ListResourcesResult, ListToolsResult, PromptSchema, ReadResourceParams, ResourceSchema,
    ResourcesCapability, ServerCapabilities, ServerInfo, ToolSchema, JSONRPC_VERSION,
    PROTOCOL_VERSION,
};
use futures::FutureExt;
use mcpforge_core::resolver::{self, CallKind};
use mcpforge_core::schema::default_input_schema;
use mcpforge_core::{
    CallArgs, CallHistory, CallHistoryEntry, DeclarationError, Handler, McpError,
    McpResult, ParameterBinding, PromptDeclaration, ResourceDeclaration, ServerDeclaration,
    ServerDefinition, ToolDeclaration, UriTemplate, MAX_PARAMETER_INDEX,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

struct ToolEntry {
    declaration: ToolDeclaration,
    handler: Arc<dyn Handler>,
}

struct ResourceEntry {
    declaration: ResourceDeclaration,
    template: UriTemplate,
    handler: Arc<dyn Handler>,
}

struct PromptEntry {
    declaration: PromptDeclaration,
    handler: Arc<dyn Handler>,
}

pub struct Dispatcher {
    server: ServerDeclaration,
    tools: Vec<ToolEntry>,
    resources: Vec<ResourceEntry>,
    prompts: Vec<PromptEntry>,
    params: Vec<ParameterBinding>,
    history: Option<Arc<CallHistory>>,
}

impl Dispatcher {
    /// Instantiate the server: read the definition and bind every handler
    /// to `instance`, which is shared by all calls on all connections.
    pub fn new<S: Send + Sync + 'static>(
        definition: ServerDefinition<S>,
        instance: S,
    ) -> Result<Self, DeclarationError> {
        let server = definition
            .server_metadata()
            .cloned()
            .ok_or(DeclarationError::MissingServer)?;

        if let Some(binding) = definition
            .params_metadata()
            .iter()
            .find(|binding| binding.index > MAX_PARAMETER_INDEX)
        {
            return Err(DeclarationError::ParameterIndex {
                handler: binding.handler.to_string(),
                index: binding.index,
                max: MAX_PARAMETER_INDEX,
            });
        }

        let handlers = definition.bind(Arc::new(instance));

        let tools = definition
            .tools_metadata()
            .iter()
            .zip(handlers.tools)
            .map(|(declaration, handler)| ToolEntry {
                declaration: declaration.clone(),
                handler,
            })
            .collect::<Vec<_>>();

        let resources = definition
            .resources_metadata()
            .iter()
            .zip(handlers.resources)
            .map(|(declaration, handler)| {
                let template = UriTemplate::parse(&declaration.uri_template).map_err(|source| {
                    DeclarationError::InvalidTemplate {
                        template: declaration.uri_template.clone(),
                        source,
                    }
                })?;
                Ok(ResourceEntry {
                    declaration: declaration.clone(),
                    template,
                    handler,
                })
            })
            .collect::<Result<Vec<_>, DeclarationError>>()?;

        let prompts = definition
            .prompts_metadata()
            .iter()
            .zip(handlers.prompts)
            .map(|(declaration, handler)| PromptEntry {
                declaration: declaration.clone(),
                handler,
            })
            .collect::<Vec<_>>();

        tracing::info!(
            server = %server.name,
            version = %server.version,
            tools = tools.len(),
            resources = resources.len(),
            prompts = prompts.len(),
            "Dispatcher ready"
        );

        Ok(Self {
            server,
            tools,
            resources,
            prompts,
            params: definition.params_metadata().to_vec(),
            history: None,
        })
    }

    /// Record every handler invocation into `history`.
    pub fn with_history(mut self, history: Arc<CallHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn history(&self) -> Option<&Arc<CallHistory>> {
        self.history.as_ref()
    }

    pub fn server(&self) -> &ServerDeclaration {
        &self.server
    }

    pub fn capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            tools: (!self.tools.is_empty()).then(ListChangedCapability::default),
            resources: (!self.resources.is_empty()).then(ResourcesCapability::default),
            prompts: (!self.prompts.is_empty()).then(ListChangedCapability::default),
        }
    }

    pub fn initialize(&self, params: &InitializeParams) -> InitializeResult {
        if let Some(client) = &params.client_info {
            tracing::info!(client = %client.name, client_version = %client.version, "Client initialized");
        }
        InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: self.capabilities(),
            server_info: ServerInfo {
                name: self.server.name.clone(),
                version: self.server.version.clone(),
            },
        }
    }

    pub fn list_tools(&self) -> ListToolsResult {
        ListToolsResult {
            tools: self
                .tools
                .iter()
                .map(|entry| ToolSchema {
                    name: entry.declaration.name.clone(),
                    description: entry.declaration.description.clone(),
                    input_schema: entry
                        .declaration
                        .input_schema
                        .clone()
                        .unwrap_or_else(default_input_schema),
                })
                .collect(),
        }
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<CallToolResult> {
        let entry = self
            .tools
            .iter()
            .find(|entry| entry.declaration.name == name)
            .ok_or_else(|| McpError::UnknownTool(name.to_string()))?;

        let args = resolver::resolve_tool_args(&self.params, &entry.declaration.handler, &arguments);
        let value = self
            .invoke(CallKind::Tool, name, arguments, &entry.handler, args)
            .await?;
        Ok(CallToolResult::from_value(value))
    }

    pub fn list_resources(&self) -> ListResourcesResult {
        ListResourcesResult {
            resources: self
                .resources
                .iter()
                .map(|entry| ResourceSchema {
                    uri: entry.declaration.uri_template.clone(),
                    name: entry.declaration.name.clone(),
                    description: entry.declaration.description.clone(),
                    mime_type: entry.declaration.mime_type.clone(),
                })
                .collect(),
        }
    }

    /// Read a resource. The handler's value is returned as is; resource
    /// handlers build their own `{contents: [...]}` envelope.
    pub async fn read_resource(&self, uri: &str) -> McpResult<Value> {
        let (entry, captures) = self
            .resources
            .iter()
            .find_map(|entry| entry.template.matches(uri).map(|captures| (entry, captures)))
            .ok_or_else(|| McpError::ResourceNotFound(uri.to_string()))?;

        tracing::debug!(uri, template = %entry.declaration.uri_template, "Resource matched");

        let args = resolver::resolve_uri_args(&self.params, &entry.declaration.handler, &captures);
        let input = serde_json::to_value(&captures).unwrap_or(Value::Null);
        self.invoke(CallKind::Resource, uri, input, &entry.handler, args).await
    }

    pub fn list_prompts(&self) -> ListPromptsResult {
        ListPromptsResult {
            prompts: self
                .prompts
                .iter()
                .map(|entry| PromptSchema {
                    name: entry.declaration.name.clone(),
                    description: entry.declaration.description.clone(),
                    arguments: entry.declaration.arguments.clone(),
                })
                .collect(),
        }
    }

    /// Render a prompt. Like resources, the handler's value is passed through.
    pub async fn get_prompt(&self, name: &str, arguments: Value) -> McpResult<Value> {
        let entry = self
            .prompts
            .iter()
            .find(|entry| entry.declaration.name == name)
            .ok_or_else(|| McpError::UnknownPrompt(name.to_string()))?;

        let args = resolver::resolve_prompt_args(&self.params, &entry.declaration.handler, &arguments);
        self.invoke(CallKind::Prompt, name, arguments, &entry.handler, args)
            .await
    }

    /// Route one JSON-RPC request. Notifications yield `None`.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.jsonrpc != JSONRPC_VERSION {
            let id = request.id.unwrap_or(Value::Null);
            return Some(JsonRpcResponse::error(id, JsonRpcError::invalid_request()));
        }

        let Some(id) = request.id else {
            tracing::debug!(method = %request.method, "Notification received");
            return None;
        };

        tracing::debug!(method = %request.method, id = %id, "Request received");

        match self.route(&request.method, request.params).await {
            Ok(result) => Some(JsonRpcResponse::success(id, result)),
            Err(err) => {
                tracing::warn!(method = %request.method, code = err.code(), error = %err, "Request failed");
                Some(JsonRpcResponse::error(id, err.into()))
            }
        }
    }

    /// Parse and route a raw JSON-RPC message.
    pub async fn handle_message(&self, text: &str) -> Option<JsonRpcResponse> {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => self.handle_value(value).await,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed JSON-RPC message");
                Some(JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error()))
            }
        }
    }

    pub async fn handle_value(&self, value: Value) -> Option<JsonRpcResponse> {
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) => self.handle_request(request).await,
            Err(_) => Some(JsonRpcResponse::error(id, JsonRpcError::invalid_request())),
        }
    }

    async fn route(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        match method {
            "initialize" => {
                let params: InitializeParams = match params {
                    Some(p) if !p.is_null() => parse_params(Some(p))?,
                    _ => InitializeParams::default(),
                };
                to_value(self.initialize(&params))
            }
            "ping" => Ok(Value::Object(Default::default())),
            "tools/list" => to_value(self.list_tools()),
            "tools/call" => {
                let params: CallToolParams = parse_params(params)?;
                to_value(self.call_tool(&params.name, params.arguments).await?)
            }
            "resources/list" => to_value(self.list_resources()),
            "resources/read" => {
                let params: ReadResourceParams = parse_params(params)?;
                self.read_resource(&params.uri).await
            }
            "prompts/list" => to_value(self.list_prompts()),
            "prompts/get" => {
                let params: GetPromptParams = parse_params(params)?;
                self.get_prompt(&params.name, params.arguments).await
            }
            other => Err(McpError::MethodNotFound(other.to_string())),
        }
    }

    async fn invoke(
        &self,
        kind: CallKind,
        name: &str,
        input: Value,
        handler: &Arc<dyn Handler>,
        args: CallArgs,
    ) -> McpResult<Value> {
        let started = Instant::now();
        let outcome = match AssertUnwindSafe(handler.invoke(args)).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(McpError::handler(err)),
            Err(_) => Err(McpError::Handler(format!("{} '{}' panicked", kind.as_str(), name))),
        };
        let elapsed = started.elapsed();

        match &outcome {
            Ok(_) => tracing::info!(kind = kind.as_str(), name, elapsed_ms = elapsed.as_millis() as u64, "Call completed"),
            Err(err) => tracing::warn!(kind = kind.as_str(), name, error = %err, "Call failed"),
        }

        if let Some(history) = &self.history {
            let recorded = match &outcome {
                Ok(value) => Ok(value.clone()),
                Err(err) => Err(err.to_string()),
            };
            history.record(CallHistoryEntry::new(kind, name, input, recorded, elapsed));
        }

        outcome
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> McpResult<T> {
    let params = params.ok_or_else(|| McpError::InvalidParams("missing params".to_string()))?;
    serde_json::from_value(params).map_err(|e| McpError::InvalidParams(e.to_string()))
}

fn to_value<T: serde::Serialize>(value: T) -> McpResult<Value> {
    serde_json::to_value(value).map_err(|e| McpError::Handler(e.to_string()))
}

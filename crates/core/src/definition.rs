//! Explicit server definitions.
//!
//! A [`ServerDefinition`] is the registration table for one server type:
//! its identity, the tools, resources and prompts it declares, the parameter
//! bindings of their handlers, and the typed methods serving them. It is an
//! ordinary value built once and read thereafter; nothing is looked up by
//! type identity or by member name at call time.
//!
//! Every declaration owns the method registered with it. A tool and a
//! resource may share a handler name without sharing a method.

use crate::declaration::{
    ParameterBinding, PromptDeclaration, ResourceDeclaration, ServerDeclaration, ToolDeclaration,
};
use crate::resolver::CallArgs;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// A method of `S`, captured at registration time.
pub type Method<S> = Arc<dyn Fn(Arc<S>, CallArgs) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// A method bound to the server instance it runs against.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    async fn invoke(&self, args: CallArgs) -> anyhow::Result<Value>;
}

/// Binds a [`Method`] to the single shared instance of `S`.
pub struct BoundMethod<S> {
    instance: Arc<S>,
    method: Method<S>,
}

impl<S> BoundMethod<S> {
    pub fn new(instance: Arc<S>, method: Method<S>) -> Self {
        Self { instance, method }
    }
}

#[async_trait::async_trait]
impl<S: Send + Sync + 'static> Handler for BoundMethod<S> {
    async fn invoke(&self, args: CallArgs) -> anyhow::Result<Value> {
        (self.method)(Arc::clone(&self.instance), args).await
    }
}

/// Handlers bound to one instance, index-aligned with the declarations of
/// the definition they came from.
pub struct BoundHandlers {
    pub tools: Vec<Arc<dyn Handler>>,
    pub resources: Vec<Arc<dyn Handler>>,
    pub prompts: Vec<Arc<dyn Handler>>,
}

pub struct ServerDefinition<S> {
    server: Option<ServerDeclaration>,
    tools: Vec<ToolDeclaration>,
    resources: Vec<ResourceDeclaration>,
    prompts: Vec<PromptDeclaration>,
    params: Vec<ParameterBinding>,
    tool_methods: Vec<Method<S>>,
    resource_methods: Vec<Method<S>>,
    prompt_methods: Vec<Method<S>>,
}

impl<S: Send + Sync + 'static> ServerDefinition<S> {
    pub fn builder() -> ServerDefinitionBuilder<S> {
        ServerDefinitionBuilder::new()
    }

    pub fn server_metadata(&self) -> Option<&ServerDeclaration> {
        self.server.as_ref()
    }

    pub fn tools_metadata(&self) -> &[ToolDeclaration] {
        &self.tools
    }

    pub fn resources_metadata(&self) -> &[ResourceDeclaration] {
        &self.resources
    }

    pub fn prompts_metadata(&self) -> &[PromptDeclaration] {
        &self.prompts
    }

    pub fn params_metadata(&self) -> &[ParameterBinding] {
        &self.params
    }

    /// Bind every declaration's method to `instance`.
    pub fn bind(&self, instance: Arc<S>) -> BoundHandlers {
        let bind_all = |methods: &[Method<S>]| -> Vec<Arc<dyn Handler>> {
            methods
                .iter()
                .map(|method| {
                    let bound: Arc<dyn Handler> =
                        Arc::new(BoundMethod::new(Arc::clone(&instance), Arc::clone(method)));
                    bound
                })
                .collect()
        };
        BoundHandlers {
            tools: bind_all(&self.tool_methods),
            resources: bind_all(&self.resource_methods),
            prompts: bind_all(&self.prompt_methods),
        }
    }
}

pub struct ServerDefinitionBuilder<S> {
    definition: ServerDefinition<S>,
}

impl<S: Send + Sync + 'static> ServerDefinitionBuilder<S> {
    pub fn new() -> Self {
        Self {
            definition: ServerDefinition {
                server: None,
                tools: Vec::new(),
                resources: Vec::new(),
                prompts: Vec::new(),
                params: Vec::new(),
                tool_methods: Vec::new(),
                resource_methods: Vec::new(),
                prompt_methods: Vec::new(),
            },
        }
    }

    pub fn server(mut self, server: ServerDeclaration) -> Self {
        self.definition.server = Some(server);
        self
    }

    /// Declare a tool served by `method`.
    ///
    /// Duplicate names are kept; dispatch picks the first one declared.
    pub fn tool<F, Fut>(mut self, tool: ToolDeclaration, method: F) -> Self
    where
        F: Fn(Arc<S>, CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.definition.tool_methods.push(into_method(method));
        self.definition.tools.push(tool);
        self
    }

    /// Declare a resource served by `method`.
    ///
    /// Templates are tried in declaration order at read time.
    pub fn resource<F, Fut>(mut self, resource: ResourceDeclaration, method: F) -> Self
    where
        F: Fn(Arc<S>, CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.definition.resource_methods.push(into_method(method));
        self.definition.resources.push(resource);
        self
    }

    pub fn prompt<F, Fut>(mut self, prompt: PromptDeclaration, method: F) -> Self
    where
        F: Fn(Arc<S>, CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.definition.prompt_methods.push(into_method(method));
        self.definition.prompts.push(prompt);
        self
    }

    pub fn param(mut self, binding: ParameterBinding) -> Self {
        self.definition.params.push(binding);
        self
    }

    pub fn build(self) -> ServerDefinition<S> {
        self.definition
    }
}

fn into_method<S, F, Fut>(f: F) -> Method<S>
where
    S: Send + Sync + 'static,
    F: Fn(Arc<S>, CallArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(
        move |this: Arc<S>, args: CallArgs| -> BoxFuture<'static, anyhow::Result<Value>> {
            Box::pin(f(this, args))
        },
    )
}

impl<S: Send + Sync + 'static> Default for ServerDefinitionBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

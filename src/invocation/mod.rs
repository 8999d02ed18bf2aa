//! Invocation dispatch: the outbound action a capability performs.
//!
//! Each invoker kind (`http`, `cli`, `extends`) registers a factory in an
//! [`InvocationRegistry`]. The process-wide default registry is published
//! once at init and read-only afterwards; tests can thread their own
//! registry through construction instead.

mod cli;
mod extends;
mod http;

pub use cli::{CliInvocationConfig, CliInvokerFactory, CliTemplateVariable};
pub use extends::{ExtendsConfig, ExtendsInvokerFactory};
pub use http::{build_http_client, HttpInvocationConfig, HttpInvokerFactory, HttpMethod};

use {
    crate::{
        config::InvocationWrapper,
        context::RequestContext,
        error::{McpError, McpResult},
        template::SourceRegistry,
    },
    async_trait::async_trait,
    once_cell::sync::Lazy,
    serde_json::{json, Value},
    std::collections::BTreeMap,
    std::sync::Arc,
};

/// Result of one invocation, rendered into MCP tool-result JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub content: Vec<Value>,
    pub is_error: bool,
    /// Backend response headers the invocation was configured to echo,
    /// lower-cased names. Surfaced under the result's `_meta`.
    pub headers: BTreeMap<String, String>,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![json!({ "type": "text", "text": text.into() })],
            is_error: false,
            headers: BTreeMap::new(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![json!({ "type": "text", "text": text.into() })],
            is_error: true,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn to_json(&self) -> Value {
        let mut result = json!({
            "content": self.content,
            "isError": self.is_error,
        });
        if !self.headers.is_empty() {
            result["_meta"] = json!({ "responseHeaders": self.headers });
        }
        result
    }

    /// Concatenated text of all text content items.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The capability primitive an invoker is bound to.
#[derive(Debug, Clone, Copy)]
pub struct Primitive<'a> {
    pub name: &'a str,
    pub input_schema: &'a Value,
}

/// A runtime invoker bound to one tool, prompt, or resource. Rendering is
/// pure: invokers never mutate their configuration.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, arguments: &Value, ctx: &RequestContext) -> McpResult<ToolResult>;
}

/// Validation-time surroundings: source registry plus the invocation bases
/// an `extends` config may refer to.
pub struct ValidationEnv<'a> {
    pub sources: &'a SourceRegistry,
    pub bases: &'a BTreeMap<String, InvocationWrapper>,
    pub registry: &'a InvocationRegistry,
}

/// Construction-time surroundings for runtime invokers.
#[derive(Clone)]
pub struct InvokerEnv {
    pub sources: SourceRegistry,
    pub bases: BTreeMap<String, InvocationWrapper>,
    pub http: reqwest::Client,
    pub registry: Arc<InvocationRegistry>,
}

/// Factory for one invoker kind.
pub trait InvokerFactory: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Parse and semantically check a raw config, including its templates.
    fn validate_config(
        &self,
        raw: &Value,
        primitive: &Primitive<'_>,
        env: &ValidationEnv<'_>,
    ) -> McpResult<()>;

    /// Validate and produce a runtime invoker bound to `primitive`.
    fn create_invoker(
        &self,
        raw: &Value,
        primitive: &Primitive<'_>,
        env: &InvokerEnv,
    ) -> McpResult<Arc<dyn Invoker>>;

    /// Apply extends patches (`remove`, then `extend`, then `override`) to a
    /// raw config of this kind, returning the resolved raw config. Kinds
    /// that cannot act as an extends base reject.
    fn resolve_patches(
        &self,
        base: &Value,
        remove: Option<&Value>,
        extend: Option<&Value>,
        override_: Option<&Value>,
    ) -> McpResult<Value> {
        let _ = (base, remove, extend, override_);
        Err(McpError::Validation(format!(
            "invocation kind {:?} cannot be used as an extends base",
            self.kind()
        )))
    }
}

/// Kind string → factory lookup.
pub struct InvocationRegistry {
    factories: BTreeMap<&'static str, Arc<dyn InvokerFactory>>,
}

impl InvocationRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry holding the built-in kinds.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(HttpInvokerFactory));
        registry.register(Arc::new(CliInvokerFactory));
        registry.register(Arc::new(ExtendsInvokerFactory));
        registry
    }

    pub fn register(&mut self, factory: Arc<dyn InvokerFactory>) {
        self.factories.insert(factory.kind(), factory);
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn factory(&self, kind: &str) -> McpResult<&Arc<dyn InvokerFactory>> {
        self.factories.get(kind).ok_or_else(|| {
            McpError::Validation(format!(
                "unknown invocation kind {kind:?}, registered kinds: {:?}",
                self.kinds()
            ))
        })
    }

    /// Validate a wrapper's config through its kind's factory.
    pub fn validate_wrapper(
        &self,
        wrapper: &InvocationWrapper,
        primitive: &Primitive<'_>,
        env: &ValidationEnv<'_>,
    ) -> McpResult<()> {
        self.factory(&wrapper.kind)?
            .validate_config(&wrapper.config, primitive, env)
    }

    /// Build the runtime invoker for a wrapper.
    pub fn create_invoker(
        &self,
        wrapper: &InvocationWrapper,
        primitive: &Primitive<'_>,
        env: &InvokerEnv,
    ) -> McpResult<Arc<dyn Invoker>> {
        self.factory(&wrapper.kind)?
            .create_invoker(&wrapper.config, primitive, env)
    }
}

impl Default for InvocationRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

static DEFAULT_REGISTRY: Lazy<Arc<InvocationRegistry>> =
    Lazy::new(|| Arc::new(InvocationRegistry::with_builtins()));

/// The process-wide registry of built-in kinds, published once.
pub fn default_registry() -> Arc<InvocationRegistry> {
    Arc::clone(&DEFAULT_REGISTRY)
}

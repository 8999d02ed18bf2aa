//! # GenMCP — declarative MCP servers for HTTP APIs and CLI tools
//!
//! GenMCP exposes arbitrary HTTP APIs and command-line utilities as
//! [Model Context Protocol](https://modelcontextprotocol.io) tools, prompts,
//! and resources. Operators declare a capability inventory and a runtime
//! configuration in two YAML documents; the server loads them, validates
//! them, and brokers MCP requests into outbound HTTP calls or local process
//! executions.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use genmcp::{CancellationToken, McpServer};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = McpServer::from_files(
//!         Path::new("tools.yaml"),
//!         Path::new("server.yaml"),
//!     )?;
//!     server.run(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Transport Layer               │  ← streamable HTTP / stdio
//! │   (OAuth middleware, health probes)     │
//! ├─────────────────────────────────────────┤
//! │           Protocol Engine               │  ← MCP message routing
//! │   (per-scope capability servers)        │
//! ├─────────────────────────────────────────┤
//! │          Invocation Layer               │  ← http / cli / extends
//! │   (templates, argument binding)         │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Tool invocations dispatch through a kind registry to the HTTP or CLI
//! invoker (possibly via an `extends` base). The invoker binds the JSON
//! arguments against the tool's input schema, renders the URL, headers,
//! command, and body templates, executes the outbound action, and returns
//! an MCP result. Callers only ever see the tools their OAuth scopes admit.

// Internal modules
mod binder;
mod capabilities;
mod config;
mod context;
mod engine;
mod error;
mod health;
mod http_transport;
mod invocation;
mod logging;
mod manager;
mod server;
mod stdio_transport;
mod template;

// Auth is public so peripheral tooling can reuse the claims model.
pub mod auth;

// Test modules
#[cfg(test)]
mod tests;

// === PUBLIC API ===
// Keep this minimal and stable!

// Server entry point
pub use crate::context::{CancellationToken, RequestContext};
pub use crate::server::McpServer;

// Configuration model, for converters and peripheral tools
pub use crate::config::{
    apply_env_overrides, combine, load_definition, parse_server_config, parse_tool_definitions,
    validate_definition, AuthConfig, ClientTlsConfig, HealthConfig, InvocationWrapper,
    McpServerDefinition, PromptDef, ResourceDef, ResourceTemplateDef, RuntimeConfig, ServerConfig,
    StreamableHttpConfig, TlsConfig, ToolAnnotations, ToolDef, ToolDefinitions, TransportProtocol,
    SUPPORTED_SCHEMA_VERSION,
};

// Invocation dispatch
pub use crate::invocation::{
    build_http_client, default_registry, CliInvocationConfig, ExtendsConfig, HttpInvocationConfig,
    HttpMethod, InvocationRegistry, Invoker, InvokerEnv, InvokerFactory, Primitive, ToolResult,
    ValidationEnv,
};

// Request-scoped logging
pub use crate::logging::RequestLogger;

// Template engine
pub use crate::binder::bind_arguments;
pub use crate::template::{
    default_source_registry, SourceFactory, SourceRegistry, SourceResolver, Template,
    TemplateBuilder, VariableSpec,
};

// Health checks
pub use crate::health::{HealthChecker, HealthStatus};

// Error types
pub use crate::error::{McpError, McpResult};

// Re-export commonly used dependencies
pub use serde_json::{json, Value};

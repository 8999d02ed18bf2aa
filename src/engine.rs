//! MCP protocol engine.
//!
//! Routes JSON-RPC messages to the capability server selected for the
//! caller's scope, maintaining per-session initialization state. The same
//! engine drives both the streamable HTTP transport and stdio.

use {
    crate::{
        context::RequestContext,
        error::{McpError, McpResult},
        manager::ServerManager,
    },
    dashmap::DashMap,
    serde_json::{json, Value},
    std::sync::Arc,
    tracing::{debug, error, info, trace},
};

/// Protocol revisions this server negotiates.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-03-26", "2025-06-18"];

const DEFAULT_SESSION: &str = "default";

#[derive(Debug, Default)]
struct SessionState {
    initialized: bool,
    protocol_version: Option<String>,
}

pub struct ProtocolEngine {
    manager: Arc<ServerManager>,
    server_name: String,
    server_version: String,
    instructions: Option<String>,
    /// Stateless transports skip initialization bookkeeping entirely.
    stateless: bool,
    sessions: DashMap<String, SessionState>,
}

impl ProtocolEngine {
    pub fn new(
        manager: Arc<ServerManager>,
        server_name: impl Into<String>,
        server_version: impl Into<String>,
        instructions: Option<String>,
        stateless: bool,
    ) -> Self {
        Self {
            manager,
            server_name: server_name.into(),
            server_version: server_version.into(),
            instructions,
            stateless,
            sessions: DashMap::new(),
        }
    }

    /// Handle one JSON-RPC message. Returns `None` for notifications, which
    /// produce no response.
    pub async fn handle_message(
        &self,
        message: Value,
        ctx: &RequestContext,
        session_id: Option<&str>,
    ) -> Option<Value> {
        let id = message.get("id").cloned();

        if message.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let error = McpError::InvalidParams("missing or invalid 'jsonrpc' field".to_string());
            return Some(error.to_json_rpc_error(id));
        }
        let Some(method) = message.get("method").and_then(Value::as_str) else {
            let error = McpError::InvalidParams("missing or invalid 'method' field".to_string());
            return Some(error.to_json_rpc_error(id));
        };
        let params = message.get("params").cloned().unwrap_or_else(|| json!({}));
        let session_key = session_id.unwrap_or(DEFAULT_SESSION).to_string();

        trace!(method, session = %session_key, "dispatching MCP method");

        if method.starts_with("notifications/") {
            self.handle_notification(method, &params, &session_key);
            return None;
        }

        let result = self
            .dispatch(method, &params, ctx, &session_key)
            .await;

        match result {
            Ok(result) => {
                debug!(method, "request handled");
                Some(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
            }
            Err(e) => {
                error!(method, error = %e, "request failed");
                Some(e.to_json_rpc_error(id))
            }
        }
    }

    async fn dispatch(
        &self,
        method: &str,
        params: &Value,
        ctx: &RequestContext,
        session_key: &str,
    ) -> McpResult<Value> {
        if method == "initialize" {
            return self.handle_initialize(params, session_key);
        }
        if method == "ping" {
            return Ok(json!({}));
        }
        if method == "logging/setLevel" {
            let level = params
                .get("level")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    McpError::InvalidParams("logging/setLevel requires a 'level' field".to_string())
                })?;
            info!(session = %session_key, level, "client adjusted log level");
            return Ok(json!({}));
        }
        self.ensure_initialized(session_key)?;

        let server = self.manager.server_for(ctx);
        match method {
            "tools/list" => Ok(server.tools_list()),
            "tools/call" => {
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        McpError::InvalidParams("tools/call requires a 'name' field".to_string())
                    })?;
                let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
                if !arguments.is_object() {
                    return Err(McpError::InvalidParams(
                        "tool arguments must be an object".to_string(),
                    ));
                }
                server.call_tool(name, &arguments, ctx).await
            }
            "prompts/list" => Ok(server.prompts_list()),
            "prompts/get" => {
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        McpError::InvalidParams("prompts/get requires a 'name' field".to_string())
                    })?;
                let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
                server.get_prompt(name, &arguments, ctx).await
            }
            "resources/list" => Ok(server.resources_list()),
            "resources/templates/list" => Ok(server.resource_templates_list()),
            "resources/read" => {
                let uri = params
                    .get("uri")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        McpError::InvalidParams("resources/read requires a 'uri' field".to_string())
                    })?;
                server.read_resource(uri, ctx).await
            }
            other => Err(McpError::UnknownMethod(other.to_string())),
        }
    }

    fn handle_initialize(&self, params: &Value, session_key: &str) -> McpResult<Value> {
        let requested = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS[SUPPORTED_PROTOCOL_VERSIONS.len() - 1]);
        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&requested) {
            return Err(McpError::InvalidParams(format!(
                "unsupported protocol version {requested}, supported: {SUPPORTED_PROTOCOL_VERSIONS:?}"
            )));
        }

        let mut session = self.sessions.entry(session_key.to_string()).or_default();
        session.initialized = true;
        session.protocol_version = Some(requested.to_string());
        drop(session);

        if let Some(client_info) = params.get("clientInfo") {
            info!(client = %client_info, protocol = requested, "client initialized");
        } else {
            info!(protocol = requested, "client initialized");
        }

        let mut result = json!({
            "protocolVersion": requested,
            "capabilities": {
                "tools": { "listChanged": false },
                "prompts": { "listChanged": false },
                "resources": { "listChanged": false },
                "logging": {},
            },
            "serverInfo": {
                "name": self.server_name,
                "version": self.server_version,
            }
        });
        if let Some(instructions) = &self.instructions {
            result["instructions"] = json!(instructions);
        }
        Ok(result)
    }

    fn handle_notification(&self, method: &str, params: &Value, session_key: &str) {
        match method {
            "notifications/initialized" => {
                debug!(session = %session_key, "client sent initialized notification");
            }
            "notifications/cancelled" => {
                info!(session = %session_key, params = %params, "client cancelled a request");
            }
            "notifications/message" => {
                let level = params.get("level").and_then(Value::as_str).unwrap_or("info");
                let text = params
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                debug!(level, "client log: {text}");
            }
            other => {
                debug!(notification = other, "ignoring unknown notification");
            }
        }
    }

    /// Drop a session's protocol state (streamable HTTP `DELETE`).
    pub fn end_session(&self, session_key: &str) {
        if self.sessions.remove(session_key).is_some() {
            debug!(session = %session_key, "session terminated by client");
        }
    }

    /// Stateful transports reject requests before `initialize`; stateless
    /// ones treat every request as self-contained.
    fn ensure_initialized(&self, session_key: &str) -> McpResult<()> {
        if self.stateless {
            return Ok(());
        }
        let initialized = self
            .sessions
            .get(session_key)
            .map(|session| session.initialized)
            .unwrap_or(false);
        if initialized {
            Ok(())
        } else {
            Err(McpError::NotInitialized)
        }
    }
}

//! Declarative configuration model.
//!
//! Two documents drive a server: the tool-definitions document
//! (`kind: MCPToolDefinitions`) declaring the capability inventory, and the
//! server-configuration document (`kind: MCPServerConfig`) declaring the
//! runtime. Both are YAML (JSON is a YAML subset), versioned by
//! `schemaVersion`, and frozen after parsing, defaulting, and env-var
//! overrides.

mod parse;
mod validate;

pub use parse::{
    apply_env_overrides, combine, load_definition, load_server_config, load_tool_definitions,
    parse_server_config, parse_tool_definitions,
};
pub use validate::{resource_template_schema, validate_definition};

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
    std::collections::BTreeMap,
};

/// The schema version this build understands. Documents carrying any other
/// version fail to parse with a migration message.
pub const SUPPORTED_SCHEMA_VERSION: &str = "v1alpha1";

pub const KIND_TOOL_DEFINITIONS: &str = "MCPToolDefinitions";
pub const KIND_SERVER_CONFIG: &str = "MCPServerConfig";

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BASE_PATH: &str = "/mcp";
pub const DEFAULT_LIVENESS_PATH: &str = "/healthz";
pub const DEFAULT_READINESS_PATH: &str = "/readyz";

/// Capability inventory document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToolDefinitions {
    pub kind: String,
    pub schema_version: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Named invocation configs that `extends`-typed invocations refer to.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub invocation_bases: BTreeMap<String, InvocationWrapper>,
    pub tools: Vec<ToolDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prompts: Vec<PromptDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_templates: Vec<ResourceTemplateDef>,
}

impl ToolDefinitions {
    /// Normalize schemas in place: an object input schema without a
    /// `properties` mapping gets an empty one so that it serializes as `{}`
    /// rather than nothing. Idempotent.
    pub fn apply_defaults(&mut self) {
        for tool in &mut self.tools {
            ensure_properties(&mut tool.input_schema);
        }
        for prompt in &mut self.prompts {
            if let Some(schema) = prompt.input_schema.as_mut() {
                ensure_properties(schema);
            }
        }
    }
}

fn ensure_properties(schema: &mut Value) {
    if let Some(object) = schema.as_object_mut() {
        if object.get("type").and_then(Value::as_str) == Some("object")
            && !object.contains_key("properties")
        {
            object.insert("properties".to_string(), Value::Object(Default::default()));
        }
    }
}

/// One MCP tool backed by an outbound invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToolDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub description: String,
    pub input_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<ToolAnnotations>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_scopes: Vec<String>,
    pub invocation: InvocationWrapper,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToolAnnotations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destructive_hint: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotent_hint: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_world_hint: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only_hint: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PromptDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_scopes: Vec<String>,
    pub invocation: InvocationWrapper,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_scopes: Vec<String>,
    pub invocation: InvocationWrapper,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceTemplateDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub uri_template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_scopes: Vec<String>,
    pub invocation: InvocationWrapper,
}

/// Discriminated invocation union: a JSON object with exactly one key
/// naming the invoker kind (`http`, `cli`, `extends`, …). Kind membership
/// against the registry is checked during validation so that the error can
/// list the registered kinds.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationWrapper {
    pub kind: String,
    pub config: Value,
}

impl Serialize for InvocationWrapper {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.kind, &self.config)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for InvocationWrapper {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        let value = Value::deserialize(deserializer)?;
        let object = value
            .as_object()
            .ok_or_else(|| D::Error::custom("invocation must be an object"))?;
        if object.len() != 1 {
            return Err(D::Error::custom(format!(
                "invocation must have exactly one kind key, found {}",
                object.len()
            )));
        }
        let (kind, config) = object.iter().next().expect("len checked above");
        Ok(InvocationWrapper {
            kind: kind.clone(),
            config: config.clone(),
        })
    }
}

/// Server runtime document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServerConfig {
    pub kind: String,
    pub schema_version: String,
    pub name: String,
    pub version: String,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuntimeConfig {
    pub transport_protocol: TransportProtocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streamable_http_config: Option<StreamableHttpConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_tls_config: Option<ClientTlsConfig>,
}

impl RuntimeConfig {
    /// Fill in the streamable-HTTP defaults. Idempotent: already-set fields
    /// are left alone, so applying twice equals applying once.
    pub fn apply_defaults(&mut self) {
        if self.transport_protocol == TransportProtocol::StreamableHttp {
            let http = self.streamable_http_config.get_or_insert_with(Default::default);
            http.port.get_or_insert(DEFAULT_PORT);
            http.base_path.get_or_insert_with(|| DEFAULT_BASE_PATH.to_string());
            http.stateless.get_or_insert(true);
            let health = http.health.get_or_insert_with(Default::default);
            health.enabled.get_or_insert(true);
            health
                .liveness_path
                .get_or_insert_with(|| DEFAULT_LIVENESS_PATH.to_string());
            health
                .readiness_path
                .get_or_insert_with(|| DEFAULT_READINESS_PATH.to_string());
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransportProtocol {
    #[serde(rename = "streamablehttp")]
    StreamableHttp,
    #[serde(rename = "stdio")]
    Stdio,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StreamableHttpConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stateless: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthConfig>,
}

impl StreamableHttpConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn base_path(&self) -> &str {
        self.base_path.as_deref().unwrap_or(DEFAULT_BASE_PATH)
    }

    pub fn stateless(&self) -> bool {
        self.stateless.unwrap_or(true)
    }

    pub fn health_enabled(&self) -> bool {
        self.health
            .as_ref()
            .and_then(|health| health.enabled)
            .unwrap_or(true)
    }

    pub fn liveness_path(&self) -> &str {
        self.health
            .as_ref()
            .and_then(|health| health.liveness_path.as_deref())
            .unwrap_or(DEFAULT_LIVENESS_PATH)
    }

    pub fn readiness_path(&self) -> &str {
        self.health
            .as_ref()
            .and_then(|health| health.readiness_path.as_deref())
            .unwrap_or(DEFAULT_READINESS_PATH)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TlsConfig {
    pub cert_file: String,
    pub key_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuthConfig {
    pub authorization_servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HealthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_path: Option<String>,
}

/// Trust configuration for the outbound HTTP client.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClientTlsConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ca_cert_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_dir: Option<String>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

/// The combined aggregate both documents materialize into: the capability
/// inventory plus the runtime, frozen for the server lifetime.
#[derive(Debug, Clone)]
pub struct McpServerDefinition {
    pub name: String,
    pub version: String,
    pub instructions: Option<String>,
    pub invocation_bases: BTreeMap<String, InvocationWrapper>,
    pub tools: Vec<ToolDef>,
    pub prompts: Vec<PromptDef>,
    pub resources: Vec<ResourceDef>,
    pub resource_templates: Vec<ResourceTemplateDef>,
    pub runtime: RuntimeConfig,
}

impl McpServerDefinition {
    /// Union of every `requiredScopes` entry across tools, sorted. Feeds the
    /// protected-resource metadata's `scopes_supported`.
    pub fn scopes_supported(&self) -> Vec<String> {
        let mut scopes: Vec<String> = self
            .tools
            .iter()
            .flat_map(|tool| tool.required_scopes.iter().cloned())
            .collect();
        scopes.sort();
        scopes.dedup();
        scopes
    }
}

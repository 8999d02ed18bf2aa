//! Document loading: YAML/JSON decode, kind and schema-version checks,
//! defaulting, environment overrides, and combining the two documents into
//! the server aggregate.

use {
    super::{
        McpServerDefinition, RuntimeConfig, ServerConfig, ToolDefinitions,
        KIND_SERVER_CONFIG, KIND_TOOL_DEFINITIONS, SUPPORTED_SCHEMA_VERSION,
    },
    crate::error::{McpError, McpResult},
    std::path::Path,
    tracing::{debug, warn},
};

/// Parse a tool-definitions document from YAML (or JSON) text.
pub fn parse_tool_definitions(text: &str) -> McpResult<ToolDefinitions> {
    let mut definitions: ToolDefinitions = serde_yaml::from_str(text)
        .map_err(|e| McpError::ConfigParse(format!("tool definitions: {e}")))?;
    check_document(&definitions.kind, KIND_TOOL_DEFINITIONS, &definitions.schema_version)?;
    definitions.apply_defaults();
    Ok(definitions)
}

/// Parse a server-configuration document from YAML (or JSON) text.
pub fn parse_server_config(text: &str) -> McpResult<ServerConfig> {
    let mut config: ServerConfig = serde_yaml::from_str(text)
        .map_err(|e| McpError::ConfigParse(format!("server config: {e}")))?;
    check_document(&config.kind, KIND_SERVER_CONFIG, &config.schema_version)?;
    config.runtime.apply_defaults();
    Ok(config)
}

pub fn load_tool_definitions(path: &Path) -> McpResult<ToolDefinitions> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        McpError::ConfigParse(format!("reading {}: {e}", path.display()))
    })?;
    parse_tool_definitions(&text)
}

pub fn load_server_config(path: &Path) -> McpResult<ServerConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        McpError::ConfigParse(format!("reading {}: {e}", path.display()))
    })?;
    parse_server_config(&text)
}

fn check_document(kind: &str, expected_kind: &str, schema_version: &str) -> McpResult<()> {
    if kind != expected_kind {
        return Err(McpError::ConfigParse(format!(
            "unexpected kind {kind:?}, expected {expected_kind:?}"
        )));
    }
    if schema_version != SUPPORTED_SCHEMA_VERSION {
        return Err(McpError::SchemaVersion {
            found: schema_version.to_string(),
            supported: SUPPORTED_SCHEMA_VERSION.to_string(),
        });
    }
    Ok(())
}

/// Apply recognized environment overrides to the runtime, after defaults and
/// before server construction. Malformed values are logged and ignored.
pub fn apply_env_overrides(runtime: &mut RuntimeConfig) {
    let Some(http) = runtime.streamable_http_config.as_mut() else {
        return;
    };

    if let Ok(raw) = std::env::var("PORT") {
        match raw.parse::<u16>() {
            Ok(port) => {
                debug!(port, "PORT override applied");
                http.port = Some(port);
            }
            Err(_) => warn!(value = %raw, "ignoring malformed PORT override"),
        }
    }

    if let Ok(raw) = std::env::var("BASE_PATH") {
        if raw.starts_with('/') {
            debug!(base_path = %raw, "BASE_PATH override applied");
            http.base_path = Some(raw);
        } else {
            warn!(value = %raw, "ignoring malformed BASE_PATH override, must start with '/'");
        }
    }

    if let Ok(raw) = std::env::var("STATELESS") {
        match raw.parse::<bool>() {
            Ok(stateless) => {
                debug!(stateless, "STATELESS override applied");
                http.stateless = Some(stateless);
            }
            Err(_) => warn!(value = %raw, "ignoring malformed STATELESS override"),
        }
    }
}

/// Combine the value side with the runtime side. When both documents name
/// the server, the names (and versions) must agree.
pub fn combine(
    definitions: ToolDefinitions,
    config: ServerConfig,
) -> McpResult<McpServerDefinition> {
    if !definitions.name.is_empty() && !config.name.is_empty() && definitions.name != config.name {
        return Err(McpError::Validation(format!(
            "document names disagree: tool definitions say {:?}, server config says {:?}",
            definitions.name, config.name
        )));
    }
    if !definitions.version.is_empty()
        && !config.version.is_empty()
        && definitions.version != config.version
    {
        return Err(McpError::Validation(format!(
            "document versions disagree: tool definitions say {:?}, server config says {:?}",
            definitions.version, config.version
        )));
    }

    let name = if definitions.name.is_empty() {
        config.name
    } else {
        definitions.name
    };
    let version = if definitions.version.is_empty() {
        config.version
    } else {
        definitions.version
    };

    Ok(McpServerDefinition {
        name,
        version,
        instructions: definitions.instructions,
        invocation_bases: definitions.invocation_bases,
        tools: definitions.tools,
        prompts: definitions.prompts,
        resources: definitions.resources,
        resource_templates: definitions.resource_templates,
        runtime: config.runtime,
    })
}

/// Load both documents, apply defaults and env overrides, combine, and run
/// deep validation. This is the single entry point the binary uses.
pub fn load_definition(
    definitions_path: &Path,
    server_config_path: &Path,
) -> McpResult<McpServerDefinition> {
    let definitions = load_tool_definitions(definitions_path)?;
    let mut config = load_server_config(server_config_path)?;
    apply_env_overrides(&mut config.runtime);
    let definition = combine(definitions, config)?;
    super::validate_definition(
        &definition,
        &crate::invocation::default_registry(),
        &crate::template::default_source_registry(),
    )?;
    Ok(definition)
}

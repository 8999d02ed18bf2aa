//! Integration tests for loading the two configuration documents from disk
//! through the public API.

use {
    genmcp::{load_definition, McpError, TransportProtocol},
    std::io::Write,
    tempfile::NamedTempFile,
};

const TOOLS_YAML: &str = r#"
kind: MCPToolDefinitions
schemaVersion: v1alpha1
name: files-demo
version: 0.2.0
tools:
  - name: list_dir
    description: List a directory
    inputSchema:
      type: object
      required: [path]
      properties:
        path:
          type: string
    invocation:
      cli:
        command: "ls {path}"
"#;

const SERVER_YAML: &str = r#"
kind: MCPServerConfig
schemaVersion: v1alpha1
name: files-demo
version: 0.2.0
runtime:
  transportProtocol: stdio
"#;

fn write_temp(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write");
    file
}

#[test]
fn loads_and_combines_documents_from_disk() {
    let tools = write_temp(TOOLS_YAML);
    let server = write_temp(SERVER_YAML);

    let definition = load_definition(tools.path(), server.path()).expect("loads");
    assert_eq!(definition.name, "files-demo");
    assert_eq!(definition.version, "0.2.0");
    assert_eq!(definition.runtime.transport_protocol, TransportProtocol::Stdio);
    assert_eq!(definition.tools.len(), 1);
}

#[test]
fn missing_file_is_a_config_error() {
    let server = write_temp(SERVER_YAML);
    let err = load_definition(std::path::Path::new("/nonexistent/tools.yaml"), server.path())
        .expect_err("missing file");
    assert!(matches!(err, McpError::ConfigParse(_)));
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn schema_version_mismatch_exits_with_code_two() {
    let tools = write_temp(&TOOLS_YAML.replace("v1alpha1", "v99"));
    let server = write_temp(SERVER_YAML);
    let err = load_definition(tools.path(), server.path()).expect_err("version mismatch");
    assert!(matches!(err, McpError::SchemaVersion { .. }));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn json_documents_are_accepted_too() {
    let tools_json = r#"{
        "kind": "MCPToolDefinitions",
        "schemaVersion": "v1alpha1",
        "name": "files-demo",
        "version": "0.2.0",
        "tools": [{
            "name": "noop",
            "description": "do nothing",
            "inputSchema": { "type": "object", "properties": {} },
            "invocation": { "cli": { "command": "true" } }
        }]
    }"#;
    let tools = write_temp(tools_json);
    let server = write_temp(SERVER_YAML);
    let definition = load_definition(tools.path(), server.path()).expect("JSON loads");
    assert_eq!(definition.tools[0].name, "noop");
}

//! Protocol engine and scope-filtering tests.

use {
    crate::{
        auth::TokenClaims,
        config::{
            parse_server_config, parse_tool_definitions, McpServerDefinition,
        },
        context::RequestContext,
        engine::ProtocolEngine,
        invocation::{build_http_client, default_registry},
        manager::ServerManager,
        template::default_source_registry,
    },
    serde_json::{json, Value},
    std::sync::Arc,
};

const TOOLS_YAML: &str = r#"
kind: MCPToolDefinitions
schemaVersion: v1alpha1
name: scoped-demo
version: 0.1.0
tools:
  - name: read_note
    description: Read a note
    requiredScopes: [r]
    inputSchema:
      type: object
      required: [msg]
      properties:
        msg:
          type: string
    invocation:
      cli:
        command: "echo {msg}"
  - name: write_note
    description: Write a note
    requiredScopes: [w]
    inputSchema:
      type: object
      properties:
        msg:
          type: string
    invocation:
      cli:
        command: "echo {msg}"
  - name: emit_json
    description: Emit structured JSON
    outputSchema:
      type: object
      properties:
        n:
          type: integer
    inputSchema:
      type: object
      properties: {}
    invocation:
      cli:
        command: "printf '\\173\"n\":1\\175'"
prompts:
  - name: summarize
    description: Summarize a topic
    inputSchema:
      type: object
      required: [topic]
      properties:
        topic:
          type: string
    invocation:
      cli:
        command: "echo summary of {topic}"
resources:
  - name: motd
    uri: "note://motd"
    mimeType: text/plain
    invocation:
      cli:
        command: "echo welcome"
"#;

const SERVER_YAML: &str = r#"
kind: MCPServerConfig
schemaVersion: v1alpha1
name: scoped-demo
version: 0.1.0
runtime:
  transportProtocol: streamablehttp
  streamableHttpConfig:
    auth:
      authorizationServers: ["https://as.example"]
"#;

fn definition() -> McpServerDefinition {
    let definitions = parse_tool_definitions(TOOLS_YAML).expect("tool definitions parse");
    let config = parse_server_config(SERVER_YAML).expect("server config parses");
    crate::config::combine(definitions, config).expect("documents combine")
}

fn manager() -> Arc<ServerManager> {
    let definition = definition();
    Arc::new(
        ServerManager::new(
            &definition,
            default_registry(),
            default_source_registry(),
            build_http_client(None).expect("client builds"),
        )
        .expect("invokers construct"),
    )
}

fn engine(stateless: bool) -> ProtocolEngine {
    ProtocolEngine::new(
        manager(),
        "scoped-demo",
        "0.1.0",
        Some("instructions here".to_string()),
        stateless,
    )
}

fn ctx_with_scope(scope: &str) -> RequestContext {
    RequestContext::new().with_claims(Some(TokenClaims {
        sub: "user-1".to_string(),
        scope: scope.to_string(),
        ..Default::default()
    }))
}

fn rpc(method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params })
}

#[tokio::test]
async fn initialize_reports_server_info_and_instructions() {
    let engine = engine(true);
    let response = engine
        .handle_message(
            rpc(
                "initialize",
                json!({
                    "protocolVersion": "2025-06-18",
                    "capabilities": {},
                    "clientInfo": { "name": "test", "version": "0" }
                }),
            ),
            &ctx_with_scope("r"),
            None,
        )
        .await
        .expect("requests get responses");

    assert_eq!(response["result"]["protocolVersion"], "2025-06-18");
    assert_eq!(response["result"]["serverInfo"]["name"], "scoped-demo");
    assert_eq!(response["result"]["instructions"], "instructions here");
}

#[tokio::test]
async fn unsupported_protocol_version_is_rejected() {
    let engine = engine(true);
    let response = engine
        .handle_message(
            rpc("initialize", json!({ "protocolVersion": "1999-01-01" })),
            &ctx_with_scope("r"),
            None,
        )
        .await
        .unwrap();
    assert!(response["error"]["message"]
        .as_str()
        .unwrap()
        .contains("unsupported protocol version"));
}

#[tokio::test]
async fn scope_gates_tool_visibility() {
    let engine = engine(true);

    let response = engine
        .handle_message(rpc("tools/list", json!({})), &ctx_with_scope("r"), None)
        .await
        .unwrap();
    let tools = response["result"]["tools"].as_array().unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    // Unscoped tools are visible to everyone; write_note needs "w".
    assert_eq!(names, vec!["read_note", "emit_json"]);

    let response = engine
        .handle_message(rpc("tools/list", json!({})), &ctx_with_scope("r w"), None)
        .await
        .unwrap();
    assert_eq!(response["result"]["tools"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn calling_a_hidden_tool_is_forbidden() {
    let engine = engine(true);
    let response = engine
        .handle_message(
            rpc(
                "tools/call",
                json!({ "name": "write_note", "arguments": { "msg": "x" } }),
            ),
            &ctx_with_scope("r"),
            None,
        )
        .await
        .unwrap();
    // The tool stays invisible in tools/list, and calling it anyway gets
    // the generic forbidden result.
    assert_eq!(response["result"]["isError"], true);
    assert_eq!(
        response["result"]["content"][0]["text"],
        "forbidden: insufficient permissions"
    );
}

#[tokio::test]
async fn insufficient_scope_returns_generic_forbidden_result() {
    let definition = definition();
    let manager = Arc::new(
        ServerManager::new(
            &definition,
            default_registry(),
            default_source_registry(),
            build_http_client(None).unwrap(),
        )
        .unwrap(),
    );
    // Reach the registered tool directly: the caller's claims lapse between
    // materialization and invocation.
    let server = manager.server_for(&ctx_with_scope("r w"));
    let weak = ctx_with_scope("r");
    let result = server
        .call_tool("write_note", &json!({ "msg": "x" }), &weak)
        .await
        .unwrap();
    assert_eq!(result["isError"], true);
    assert_eq!(
        result["content"][0]["text"],
        "forbidden: insufficient permissions"
    );
}

#[tokio::test]
async fn tool_call_executes_and_returns_output() {
    let engine = engine(true);
    let response = engine
        .handle_message(
            rpc(
                "tools/call",
                json!({ "name": "read_note", "arguments": { "msg": "hello" } }),
            ),
            &ctx_with_scope("r"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(response["result"]["isError"], false);
    assert_eq!(response["result"]["content"][0]["text"], "hello");
}

#[tokio::test]
async fn missing_required_argument_is_an_error_result() {
    let engine = engine(true);
    let response = engine
        .handle_message(
            rpc("tools/call", json!({ "name": "read_note", "arguments": {} })),
            &ctx_with_scope("r"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(response["result"]["isError"], true);
    let text = response["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("missing required field"));
}

#[tokio::test]
async fn output_schema_tools_surface_structured_content() {
    let engine = engine(true);
    let response = engine
        .handle_message(
            rpc("tools/call", json!({ "name": "emit_json", "arguments": {} })),
            &ctx_with_scope(""),
            None,
        )
        .await
        .unwrap();
    assert_eq!(response["result"]["isError"], false);
    assert_eq!(response["result"]["structuredContent"], json!({ "n": 1 }));
}

#[tokio::test]
async fn prompts_and_resources_round_trip() {
    let engine = engine(true);
    let ctx = ctx_with_scope("r");

    let response = engine
        .handle_message(rpc("prompts/list", json!({})), &ctx, None)
        .await
        .unwrap();
    let prompts = response["result"]["prompts"].as_array().unwrap();
    assert_eq!(prompts[0]["name"], "summarize");
    assert_eq!(prompts[0]["arguments"][0]["name"], "topic");

    let response = engine
        .handle_message(
            rpc("prompts/get", json!({ "name": "summarize", "arguments": { "topic": "rust" } })),
            &ctx,
            None,
        )
        .await
        .unwrap();
    assert_eq!(
        response["result"]["messages"][0]["content"]["text"],
        "summary of rust"
    );

    let response = engine
        .handle_message(rpc("resources/read", json!({ "uri": "note://motd" })), &ctx, None)
        .await
        .unwrap();
    assert_eq!(response["result"]["contents"][0]["text"], "welcome");
    assert_eq!(response["result"]["contents"][0]["mimeType"], "text/plain");
}

#[tokio::test]
async fn stateful_mode_requires_initialize_first() {
    let engine = engine(false);
    let response = engine
        .handle_message(rpc("tools/list", json!({})), &ctx_with_scope("r"), Some("s1"))
        .await
        .unwrap();
    assert_eq!(response["error"]["code"], -32002);

    engine
        .handle_message(
            rpc("initialize", json!({ "protocolVersion": "2025-06-18" })),
            &ctx_with_scope("r"),
            Some("s1"),
        )
        .await
        .unwrap();
    let response = engine
        .handle_message(rpc("tools/list", json!({})), &ctx_with_scope("r"), Some("s1"))
        .await
        .unwrap();
    assert!(response["result"]["tools"].is_array());
}

#[tokio::test]
async fn notifications_produce_no_response() {
    let engine = engine(true);
    let message = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
    let response = engine
        .handle_message(message, &ctx_with_scope("r"), None)
        .await;
    assert!(response.is_none());
}

#[tokio::test]
async fn unknown_method_is_a_json_rpc_error() {
    let engine = engine(true);
    let response = engine
        .handle_message(rpc("tools/destroy", json!({})), &ctx_with_scope("r"), None)
        .await
        .unwrap();
    assert_eq!(response["error"]["code"], -32601);
}

#[tokio::test]
async fn identical_scope_sets_share_one_server() {
    let manager = manager();
    let a = manager.server_for(&ctx_with_scope("r w"));
    let b = manager.server_for(&ctx_with_scope("w r"));
    assert!(Arc::ptr_eq(&a, &b));

    let c = manager.server_for(&ctx_with_scope("r"));
    assert!(!Arc::ptr_eq(&a, &c));
}

#[tokio::test]
async fn scope_sets_with_equal_tool_sets_share_via_filtered_cache() {
    let manager = manager();
    // Neither extra scope unlocks more tools than plain "r".
    let a = manager.server_for(&ctx_with_scope("r"));
    let b = manager.server_for(&ctx_with_scope("r unknown-scope"));
    assert!(Arc::ptr_eq(&a, &b));
}

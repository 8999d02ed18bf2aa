//! CLI invoker tests executing real child processes.

use {
    crate::{
        config::InvocationWrapper,
        context::RequestContext,
        invocation::{build_http_client, default_registry, Invoker, InvokerEnv, Primitive},
        template::default_source_registry,
    },
    serde_json::{json, Value},
    std::collections::BTreeMap,
    std::sync::Arc,
};

fn cli_invoker(config: Value, schema: &Value) -> Arc<dyn Invoker> {
    let env = InvokerEnv {
        sources: default_source_registry(),
        bases: BTreeMap::new(),
        http: build_http_client(None).expect("client builds"),
        registry: default_registry(),
    };
    default_registry()
        .create_invoker(
            &InvocationWrapper {
                kind: "cli".to_string(),
                config,
            },
            &Primitive {
                name: "test_tool",
                input_schema: schema,
            },
            &env,
        )
        .expect("invoker constructs")
}

fn flag_schema() -> Value {
    json!({
        "type": "object",
        "required": ["path"],
        "properties": {
            "path": { "type": "string" },
            "recursive": { "type": "boolean" },
            "verbose": { "type": "boolean" }
        }
    })
}

#[tokio::test]
async fn optional_flag_is_omitted_when_false() {
    let invoker = cli_invoker(
        json!({
            "command": "echo {path}",
            "templateVariables": {
                "recursive": { "format": "-R", "omitIfFalse": true }
            }
        }),
        &flag_schema(),
    );

    let result = invoker
        .invoke(&json!({ "path": ".", "recursive": false }), &RequestContext::new())
        .await
        .unwrap();
    assert!(!result.is_error);
    assert_eq!(result.text_content(), ".");

    let result = invoker
        .invoke(&json!({ "path": ".", "recursive": true }), &RequestContext::new())
        .await
        .unwrap();
    assert_eq!(result.text_content(), ". -R");
}

#[tokio::test]
async fn independent_flags_do_not_contaminate_each_other() {
    let invoker = cli_invoker(
        json!({
            "command": "echo {path}",
            "templateVariables": {
                "recursive": { "format": "-R", "omitIfFalse": true },
                "verbose": { "format": "-v", "omitIfFalse": true }
            }
        }),
        &flag_schema(),
    );

    // The false verbose leaf binds after recursive (alphabetical argument
    // order) and must not swallow the true -R flag.
    let result = invoker
        .invoke(
            &json!({ "path": ".", "recursive": true, "verbose": false }),
            &RequestContext::new(),
        )
        .await
        .unwrap();
    assert_eq!(result.text_content(), ". -R");

    let result = invoker
        .invoke(
            &json!({ "path": ".", "recursive": false, "verbose": true }),
            &RequestContext::new(),
        )
        .await
        .unwrap();
    assert_eq!(result.text_content(), ". -v");

    let result = invoker
        .invoke(
            &json!({ "path": ".", "recursive": true, "verbose": true }),
            &RequestContext::new(),
        )
        .await
        .unwrap();
    assert_eq!(result.text_content(), ". -R -v");
}

#[tokio::test]
async fn quoted_arguments_stay_one_token() {
    let schema = json!({
        "type": "object",
        "required": ["message"],
        "properties": { "message": { "type": "string" } }
    });
    let invoker = cli_invoker(json!({ "command": "echo \"{message}\"" }), &schema);

    let result = invoker
        .invoke(&json!({ "message": "hello world" }), &RequestContext::new())
        .await
        .unwrap();
    assert_eq!(result.text_content(), "hello world");
}

#[tokio::test]
async fn nonzero_exit_returns_error_result_with_output() {
    let schema = json!({ "type": "object", "properties": {} });
    let invoker = cli_invoker(
        json!({ "command": "sh -c \"echo boom >&2; exit 3\"" }),
        &schema,
    );

    let result = invoker.invoke(&json!({}), &RequestContext::new()).await.unwrap();
    assert!(result.is_error);
    assert!(result.text_content().contains("boom"));
}

#[tokio::test]
async fn rendered_environment_reaches_the_child() {
    let schema = json!({
        "type": "object",
        "required": ["name"],
        "properties": { "name": { "type": "string" } }
    });
    let invoker = cli_invoker(
        json!({
            "command": "sh -c \"echo $GREETING\"",
            "env": { "GREETING": "hi {name}" }
        }),
        &schema,
    );

    let result = invoker
        .invoke(&json!({ "name": "world" }), &RequestContext::new())
        .await
        .unwrap();
    assert_eq!(result.text_content(), "hi world");
}

#[tokio::test]
async fn cwd_template_controls_the_working_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let schema = json!({ "type": "object", "properties": {} });
    let invoker = cli_invoker(
        json!({ "command": "pwd", "cwd": dir.path().to_str().unwrap() }),
        &schema,
    );

    let result = invoker.invoke(&json!({}), &RequestContext::new()).await.unwrap();
    // Resolve symlinks on platforms where the temp dir is linked.
    let expected = dir.path().canonicalize().expect("canonical path");
    let reported = std::path::Path::new(result.text_content().trim())
        .canonicalize()
        .expect("canonical output");
    assert_eq!(reported, expected);
}

#[tokio::test]
async fn integer_parameters_format_without_decoration() {
    let schema = json!({
        "type": "object",
        "required": ["count"],
        "properties": { "count": { "type": "integer" } }
    });
    let invoker = cli_invoker(json!({ "command": "echo {count}" }), &schema);

    let result = invoker
        .invoke(&json!({ "count": 7 }), &RequestContext::new())
        .await
        .unwrap();
    assert_eq!(result.text_content(), "7");
}

#[tokio::test]
async fn cancellation_terminates_the_child() {
    let schema = json!({ "type": "object", "properties": {} });
    let invoker = cli_invoker(json!({ "command": "sleep 30" }), &schema);

    let ctx = RequestContext::new();
    let cancel = ctx.cancel.clone();
    let handle = tokio::spawn(async move { invoker.invoke(&json!({}), &ctx).await });
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    cancel.cancel();

    let err = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("returns promptly after cancellation")
        .expect("task joins")
        .expect_err("cancellation error");
    assert!(matches!(err, crate::error::McpError::Cancelled));
}

#[tokio::test]
async fn type_mismatch_is_an_argument_error() {
    let schema = json!({
        "type": "object",
        "required": ["count"],
        "properties": { "count": { "type": "integer" } }
    });
    let invoker = cli_invoker(json!({ "command": "echo {count}" }), &schema);

    let err = invoker
        .invoke(&json!({ "count": "seven" }), &RequestContext::new())
        .await
        .expect_err("binding fails");
    assert!(err.to_string().contains("expected integer"));
}

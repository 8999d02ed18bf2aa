//! Template engine behavior through the public API.

use {
    genmcp::{bind_arguments, json, SourceRegistry, Template},
    std::collections::BTreeMap,
};

fn schema() -> genmcp::Value {
    json!({
        "type": "object",
        "required": ["name"],
        "properties": {
            "name": { "type": "string" },
            "count": { "type": "integer" },
            "enabled": { "type": "boolean" },
            "ratio": { "type": "number" }
        }
    })
}

#[test]
fn rendering_substitutes_each_occurrence() {
    let tpl = Template::parse(
        "https://api/{name}/items/{count}/again/{name}",
        &schema(),
        &SourceRegistry::new(),
    )
    .unwrap();
    let mut builder = tpl.builder(BTreeMap::new());
    bind_arguments(
        &schema(),
        &json!({ "name": "abc", "count": 5 }),
        &mut [&mut builder],
    )
    .unwrap();
    assert_eq!(
        builder.get_result().unwrap(),
        "https://api/abc/items/5/again/abc"
    );
}

#[test]
fn zero_variable_template_renders_to_itself() {
    let tpl = Template::parse("discount is 100% off", &schema(), &SourceRegistry::new()).unwrap();
    assert_eq!(
        tpl.builder(BTreeMap::new()).get_result().unwrap(),
        "discount is 100% off"
    );
}

#[test]
fn typed_values_format_by_schema_type() {
    let tpl = Template::parse(
        "{name} {count} {enabled} {ratio}",
        &schema(),
        &SourceRegistry::new(),
    )
    .unwrap();
    let mut builder = tpl.builder(BTreeMap::new());
    bind_arguments(
        &schema(),
        &json!({ "name": "x", "count": 3, "enabled": true, "ratio": 1.5 }),
        &mut [&mut builder],
    )
    .unwrap();
    assert_eq!(builder.get_result().unwrap(), "x 3 true 1.5");
}

#[test]
fn omit_if_false_boolean_renders_empty() {
    let tpl = Template::parse("--verbose", &schema(), &SourceRegistry::new())
        .unwrap()
        .with_omit_if_false(true)
        .unwrap();

    let mut builder = tpl.builder(BTreeMap::new());
    builder.set_field("enabled", &json!(false)).unwrap();
    assert_eq!(builder.get_result().unwrap(), "");
}

#[test]
fn unset_required_variable_fails_rendering() {
    let tpl = Template::parse("hello {name}", &schema(), &SourceRegistry::new()).unwrap();
    let err = tpl
        .builder(BTreeMap::new())
        .get_result()
        .expect_err("nothing bound");
    assert!(err.to_string().contains("missing required parameter"));
}

#[test]
fn binding_collects_all_violations() {
    let err = bind_arguments(
        &schema(),
        &json!({ "count": true, "surprise": 1 }),
        &mut [],
    )
    .expect_err("several violations");
    let message = err.to_string();
    assert!(message.contains("missing required field `name`"));
    assert!(message.contains("expected integer"));
    assert!(message.contains("unknown field `surprise`"));
}

//! Schema-directed argument binding.
//!
//! Walks a tool-call argument document against the tool's input schema,
//! producing a dotted-path value map and feeding every attached
//! [`TemplateBuilder`] as leaves are visited. Objects recurse with `.`
//! separators, arrays bind items with an `[i]` suffix. Binding collects all
//! errors instead of failing on the first.

use {
    crate::error::{McpError, McpResult},
    crate::template::TemplateBuilder,
    serde_json::{Map, Value},
    std::collections::BTreeMap,
};

/// Bind `args` against `schema`, routing every leaf to `builders`.
/// Returns the dotted-path → value map of all bound leaves.
pub fn bind_arguments(
    schema: &Value,
    args: &Value,
    builders: &mut [&mut TemplateBuilder<'_>],
) -> McpResult<BTreeMap<String, Value>> {
    let object = args
        .as_object()
        .ok_or_else(|| McpError::Argument("arguments must be a JSON object".to_string()))?;

    let mut bound = Binding {
        values: BTreeMap::new(),
        errors: Vec::new(),
    };
    bound.bind_object(schema, object, "", builders);

    if bound.errors.is_empty() {
        Ok(bound.values)
    } else {
        Err(McpError::Argument(bound.errors.join("; ")))
    }
}

struct Binding {
    values: BTreeMap<String, Value>,
    errors: Vec<String>,
}

impl Binding {
    fn bind_object(
        &mut self,
        schema: &Value,
        object: &Map<String, Value>,
        prefix: &str,
        builders: &mut [&mut TemplateBuilder<'_>],
    ) {
        let properties = schema.get("properties").and_then(Value::as_object);

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(name) {
                    self.errors
                        .push(format!("missing required field `{}`", join(prefix, name)));
                }
            }
        }

        for (key, value) in object {
            let path = join(prefix, key);
            match properties.and_then(|props| props.get(key)) {
                Some(property) => self.bind_value(property, value, &path, builders),
                None => {
                    if additional_properties_allowed(schema) {
                        self.leaf(&path, value, builders);
                    } else {
                        self.errors.push(format!("unknown field `{path}`"));
                    }
                }
            }
        }
    }

    fn bind_value(
        &mut self,
        property: &Value,
        value: &Value,
        path: &str,
        builders: &mut [&mut TemplateBuilder<'_>],
    ) {
        match property.get("type").and_then(Value::as_str) {
            Some("object") => match value.as_object() {
                Some(object) => self.bind_object(property, object, path, builders),
                None => self.type_error(path, "object", value),
            },
            Some("array") => match value.as_array() {
                Some(items) => {
                    let item_schema = property.get("items").unwrap_or(&Value::Null);
                    for (i, item) in items.iter().enumerate() {
                        self.bind_value(item_schema, item, &format!("{path}[{i}]"), builders);
                    }
                }
                None => self.type_error(path, "array", value),
            },
            Some("string") => {
                if value.is_string() {
                    self.leaf(path, value, builders);
                } else {
                    self.type_error(path, "string", value);
                }
            }
            Some("integer") => {
                if value.as_i64().is_some() {
                    self.leaf(path, value, builders);
                } else {
                    self.type_error(path, "integer", value);
                }
            }
            Some("number") => {
                if value.as_f64().is_some() {
                    self.leaf(path, value, builders);
                } else {
                    self.type_error(path, "number", value);
                }
            }
            Some("boolean") => {
                if value.as_bool().is_some() {
                    self.leaf(path, value, builders);
                } else {
                    self.type_error(path, "boolean", value);
                }
            }
            _ => self.leaf(path, value, builders),
        }
    }

    fn leaf(&mut self, path: &str, value: &Value, builders: &mut [&mut TemplateBuilder<'_>]) {
        self.values.insert(path.to_string(), value.clone());
        for builder in builders.iter_mut() {
            if let Err(e) = builder.set_field(path, value) {
                self.errors.push(e.to_string());
            }
        }
    }

    fn type_error(&mut self, path: &str, expected: &str, value: &Value) {
        self.errors.push(format!(
            "field `{path}` expected {expected}, got {}",
            type_name(value)
        ));
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn additional_properties_allowed(schema: &Value) -> bool {
    match schema.get("additionalProperties") {
        Some(Value::Bool(allowed)) => *allowed,
        Some(_) => true, // a schema for additional properties permits them
        None => false,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::template::{SourceRegistry, Template},
        serde_json::json,
    };

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["userId"],
            "properties": {
                "userId": { "type": "string" },
                "count": { "type": "integer" },
                "nested": {
                    "type": "object",
                    "properties": { "leaf": { "type": "string" } }
                },
                "tags": { "type": "array", "items": { "type": "string" } }
            }
        })
    }

    #[test]
    fn binds_leaves_and_feeds_builders() {
        let tpl = Template::parse("u={userId}", &schema(), &SourceRegistry::new()).unwrap();
        let mut builder = tpl.builder(Default::default());

        let values = bind_arguments(
            &schema(),
            &json!({"userId": "42", "count": 3}),
            &mut [&mut builder],
        )
        .unwrap();

        assert_eq!(values["userId"], json!("42"));
        assert_eq!(values["count"], json!(3));
        assert_eq!(builder.get_result().unwrap(), "u=42");
    }

    #[test]
    fn nested_objects_bind_with_dotted_paths() {
        let values = bind_arguments(
            &schema(),
            &json!({"userId": "u", "nested": {"leaf": "x"}}),
            &mut [],
        )
        .unwrap();
        assert_eq!(values["nested.leaf"], json!("x"));
    }

    #[test]
    fn arrays_bind_with_index_suffix() {
        let values = bind_arguments(
            &schema(),
            &json!({"userId": "u", "tags": ["a", "b"]}),
            &mut [],
        )
        .unwrap();
        assert_eq!(values["tags[0]"], json!("a"));
        assert_eq!(values["tags[1]"], json!("b"));
    }

    #[test]
    fn collects_every_error() {
        let err = bind_arguments(
            &schema(),
            &json!({"count": "three", "mystery": true}),
            &mut [],
        )
        .expect_err("two violations plus a missing field");
        let message = err.to_string();
        assert!(message.contains("missing required field `userId`"));
        assert!(message.contains("field `count` expected integer"));
        assert!(message.contains("unknown field `mystery`"));
    }

    #[test]
    fn rejects_non_object_arguments() {
        let err = bind_arguments(&schema(), &json!([1, 2]), &mut []).expect_err("array input");
        assert!(err.to_string().contains("must be a JSON object"));
    }
}

//! Deep validation across the combined server aggregate: schema shape,
//! capability-name uniqueness, invocation-kind registration, and template
//! parseability. Every failure here is fatal at startup.

use {
    super::McpServerDefinition,
    crate::{
        error::{McpError, McpResult},
        invocation::{InvocationRegistry, Primitive, ValidationEnv},
        template::SourceRegistry,
    },
    serde_json::{json, Value},
    std::collections::BTreeSet,
};

pub fn validate_definition(
    definition: &McpServerDefinition,
    registry: &InvocationRegistry,
    sources: &SourceRegistry,
) -> McpResult<()> {
    let env = ValidationEnv {
        sources,
        bases: &definition.invocation_bases,
        registry,
    };

    for (name, base) in &definition.invocation_bases {
        if base.kind == "extends" {
            return Err(McpError::Validation(format!(
                "invocation base {name:?} must be a concrete kind, not extends"
            )));
        }
        registry.factory(&base.kind)?;
    }

    let mut seen = BTreeSet::new();
    for tool in &definition.tools {
        if !is_identifier(&tool.name) {
            return Err(McpError::Validation(format!(
                "tool name {:?} is not a valid identifier",
                tool.name
            )));
        }
        if !seen.insert(tool.name.as_str()) {
            return Err(McpError::Validation(format!(
                "duplicate tool name {:?}",
                tool.name
            )));
        }
        check_object_schema(&tool.name, &tool.input_schema)?;
        let primitive = Primitive {
            name: &tool.name,
            input_schema: &tool.input_schema,
        };
        registry.validate_wrapper(&tool.invocation, &primitive, &env)?;
    }

    let empty = empty_object_schema();
    let mut seen = BTreeSet::new();
    for prompt in &definition.prompts {
        if !seen.insert(prompt.name.as_str()) {
            return Err(McpError::Validation(format!(
                "duplicate prompt name {:?}",
                prompt.name
            )));
        }
        if let Some(schema) = &prompt.input_schema {
            check_object_schema(&prompt.name, schema)?;
        }
        let primitive = Primitive {
            name: &prompt.name,
            input_schema: prompt.input_schema.as_ref().unwrap_or(&empty),
        };
        registry.validate_wrapper(&prompt.invocation, &primitive, &env)?;
    }

    let mut seen = BTreeSet::new();
    for resource in &definition.resources {
        if !seen.insert(resource.uri.as_str()) {
            return Err(McpError::Validation(format!(
                "duplicate resource uri {:?}",
                resource.uri
            )));
        }
        let primitive = Primitive {
            name: &resource.name,
            input_schema: &empty,
        };
        registry.validate_wrapper(&resource.invocation, &primitive, &env)?;
    }

    for template in &definition.resource_templates {
        let schema = resource_template_schema(&template.uri_template);
        let primitive = Primitive {
            name: &template.name,
            input_schema: &schema,
        };
        registry.validate_wrapper(&template.invocation, &primitive, &env)?;
    }

    Ok(())
}

/// A resource template's invocation binds the variables of its URI
/// template; synthesize the string-typed schema they validate against.
pub fn resource_template_schema(uri_template: &str) -> Value {
    let mut properties = serde_json::Map::new();
    let mut rest = uri_template;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        let name = &rest[open + 1..open + close];
        if !name.is_empty() {
            properties.insert(name.to_string(), json!({ "type": "string" }));
        }
        rest = &rest[open + close + 1..];
    }
    json!({ "type": "object", "properties": properties })
}

fn empty_object_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

fn check_object_schema(name: &str, schema: &Value) -> McpResult<()> {
    if schema.get("type").and_then(Value::as_str) != Some("object") {
        return Err(McpError::Validation(format!(
            "{name:?}: input schema type must be \"object\""
        )));
    }
    if !schema
        .get("properties")
        .map(Value::is_object)
        .unwrap_or(false)
    {
        return Err(McpError::Validation(format!(
            "{name:?}: input schema must carry a properties mapping"
        )));
    }
    Ok(())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

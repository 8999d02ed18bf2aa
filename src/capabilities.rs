//! A materialized capability server: the tools visible to one scope set,
//! plus every prompt, resource, and resource template, each bound to its
//! runtime invoker.
//!
//! Tools a caller cannot invoke are absent from the server entirely, so
//! `tools/list` never advertises them. Prompts and resources are registered
//! unfiltered and re-checked at invocation time. Every handler re-validates
//! `requiredScopes` against the request claims before delegating.

use {
    crate::{
        config::{PromptDef, ResourceDef, ResourceTemplateDef, ToolDef},
        context::RequestContext,
        error::{McpError, McpResult},
        invocation::{Invoker, ToolResult},
    },
    serde_json::{json, Map, Value},
    std::collections::BTreeMap,
    std::sync::Arc,
    tracing::{error, warn},
};

pub struct RegisteredTool {
    pub def: ToolDef,
    pub invoker: Arc<dyn Invoker>,
}

pub struct RegisteredPrompt {
    pub def: PromptDef,
    pub invoker: Arc<dyn Invoker>,
}

pub struct RegisteredResource {
    pub def: ResourceDef,
    pub invoker: Arc<dyn Invoker>,
}

pub struct RegisteredResourceTemplate {
    pub def: ResourceTemplateDef,
    pub invoker: Arc<dyn Invoker>,
}

pub struct CapabilityServer {
    /// Every tool in the inventory; `visible` gates what `tools/list`
    /// advertises, while invocation-time scope checks guard the rest.
    tools: Vec<Arc<RegisteredTool>>,
    visible: std::collections::BTreeSet<String>,
    prompts: Vec<Arc<RegisteredPrompt>>,
    resources: Vec<Arc<RegisteredResource>>,
    resource_templates: Vec<Arc<RegisteredResourceTemplate>>,
    /// Scope checks only apply when the transport authenticates callers.
    auth_enabled: bool,
}

impl CapabilityServer {
    pub fn new(
        tools: Vec<Arc<RegisteredTool>>,
        visible: std::collections::BTreeSet<String>,
        prompts: Vec<Arc<RegisteredPrompt>>,
        resources: Vec<Arc<RegisteredResource>>,
        resource_templates: Vec<Arc<RegisteredResourceTemplate>>,
        auth_enabled: bool,
    ) -> Self {
        Self {
            tools,
            visible,
            prompts,
            resources,
            resource_templates,
            auth_enabled,
        }
    }

    pub fn tools_list(&self) -> Value {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .filter(|tool| self.visible.contains(&tool.def.name))
            .map(|tool| {
                let def = &tool.def;
                let mut entry = json!({
                    "name": def.name,
                    "description": def.description,
                    "inputSchema": def.input_schema,
                });
                if let Some(title) = &def.title {
                    entry["title"] = json!(title);
                }
                if let Some(output_schema) = &def.output_schema {
                    entry["outputSchema"] = output_schema.clone();
                }
                if let Some(annotations) = &def.annotations {
                    entry["annotations"] = serde_json::to_value(annotations).unwrap_or_default();
                }
                entry
            })
            .collect();
        json!({ "tools": tools })
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: &Value,
        ctx: &RequestContext,
    ) -> McpResult<Value> {
        let tool = self
            .tools
            .iter()
            .find(|tool| tool.def.name == name)
            .ok_or_else(|| McpError::UnknownTool(name.to_string()))?;

        if let Some(result) = self.authorize(name, &tool.def.required_scopes, ctx) {
            return Ok(result.to_json());
        }

        ctx.logger.debug(&format!("invoking tool {name}"));
        match tool.invoker.invoke(arguments, ctx).await {
            Ok(result) => {
                let mut response = result.to_json();
                // Tools declaring an output schema surface JSON responses as
                // structured content alongside the text item.
                if !result.is_error && tool.def.output_schema.is_some() {
                    if let Ok(parsed) = serde_json::from_str::<Value>(&result.text_content()) {
                        response["structuredContent"] = parsed;
                    }
                }
                Ok(response)
            }
            Err(e) => Ok(invocation_failure(name, e, ctx)?.to_json()),
        }
    }

    pub fn prompts_list(&self) -> Value {
        let prompts: Vec<Value> = self
            .prompts
            .iter()
            .map(|prompt| {
                let def = &prompt.def;
                let mut entry = json!({
                    "name": def.name,
                    "description": def.description,
                });
                if let Some(title) = &def.title {
                    entry["title"] = json!(title);
                }
                let arguments = prompt_arguments(def.input_schema.as_ref());
                if !arguments.is_empty() {
                    entry["arguments"] = json!(arguments);
                }
                entry
            })
            .collect();
        json!({ "prompts": prompts })
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: &Value,
        ctx: &RequestContext,
    ) -> McpResult<Value> {
        let prompt = self
            .prompts
            .iter()
            .find(|prompt| prompt.def.name == name)
            .ok_or_else(|| McpError::UnknownPrompt(name.to_string()))?;

        if self.authorize(name, &prompt.def.required_scopes, ctx).is_some() {
            return Err(McpError::Forbidden);
        }

        let result = prompt.invoker.invoke(arguments, ctx).await?;
        if result.is_error {
            return Err(McpError::Invocation(result.text_content()));
        }
        Ok(json!({
            "description": prompt.def.description,
            "messages": [{
                "role": "user",
                "content": { "type": "text", "text": result.text_content() }
            }]
        }))
    }

    pub fn resources_list(&self) -> Value {
        let resources: Vec<Value> = self
            .resources
            .iter()
            .map(|resource| {
                let def = &resource.def;
                let mut entry = json!({
                    "uri": def.uri,
                    "name": def.name,
                });
                if let Some(description) = &def.description {
                    entry["description"] = json!(description);
                }
                if let Some(mime_type) = &def.mime_type {
                    entry["mimeType"] = json!(mime_type);
                }
                entry
            })
            .collect();
        json!({ "resources": resources })
    }

    pub fn resource_templates_list(&self) -> Value {
        let templates: Vec<Value> = self
            .resource_templates
            .iter()
            .map(|template| {
                let def = &template.def;
                let mut entry = json!({
                    "uriTemplate": def.uri_template,
                    "name": def.name,
                });
                if let Some(description) = &def.description {
                    entry["description"] = json!(description);
                }
                if let Some(mime_type) = &def.mime_type {
                    entry["mimeType"] = json!(mime_type);
                }
                entry
            })
            .collect();
        json!({ "resourceTemplates": templates })
    }

    pub async fn read_resource(&self, uri: &str, ctx: &RequestContext) -> McpResult<Value> {
        if let Some(resource) = self.resources.iter().find(|resource| resource.def.uri == uri) {
            if self
                .authorize(&resource.def.name, &resource.def.required_scopes, ctx)
                .is_some()
            {
                return Err(McpError::Forbidden);
            }
            let result = resource.invoker.invoke(&json!({}), ctx).await?;
            if result.is_error {
                return Err(McpError::Invocation(result.text_content()));
            }
            return Ok(resource_contents(uri, resource.def.mime_type.as_deref(), &result));
        }

        for template in &self.resource_templates {
            let Some(variables) = match_uri_template(&template.def.uri_template, uri) else {
                continue;
            };
            if self
                .authorize(&template.def.name, &template.def.required_scopes, ctx)
                .is_some()
            {
                return Err(McpError::Forbidden);
            }
            let arguments = Value::Object(
                variables
                    .into_iter()
                    .map(|(name, value)| (name, Value::String(value)))
                    .collect::<Map<String, Value>>(),
            );
            let result = template.invoker.invoke(&arguments, ctx).await?;
            if result.is_error {
                return Err(McpError::Invocation(result.text_content()));
            }
            return Ok(resource_contents(uri, template.def.mime_type.as_deref(), &result));
        }

        Err(McpError::UnknownResource(uri.to_string()))
    }

    /// Re-check `requiredScopes` against the caller. On failure, log the
    /// full detail server-side and hand back the generic forbidden result;
    /// the client never learns which scope was missing.
    fn authorize(
        &self,
        capability: &str,
        required: &[String],
        ctx: &RequestContext,
    ) -> Option<ToolResult> {
        if !self.auth_enabled || required.is_empty() {
            return None;
        }
        match ctx.claims.as_ref() {
            Some(claims) if claims.has_scopes(required) => None,
            Some(claims) => {
                warn!(
                    capability,
                    sub = %claims.sub,
                    missing = ?claims.missing_scopes(required),
                    "caller lacks required scopes"
                );
                Some(ToolResult::error("forbidden: insufficient permissions"))
            }
            None => {
                warn!(capability, "unauthenticated caller denied");
                Some(ToolResult::error("forbidden: insufficient permissions"))
            }
        }
    }
}

/// Map an invoker failure to the client-visible result. Cancellation
/// propagates; argument errors describe the failure; everything else is
/// logged in full and reported generically.
fn invocation_failure(name: &str, error: McpError, ctx: &RequestContext) -> McpResult<ToolResult> {
    match error {
        McpError::Cancelled => Err(McpError::Cancelled),
        McpError::Argument(message) => {
            ctx.logger.warn(&format!("tool {name}: invalid arguments: {message}"));
            Ok(ToolResult::error(format!("invalid arguments: {message}")))
        }
        other => {
            error!(tool = name, error = %other, "invocation failed");
            Ok(ToolResult::error("invocation failed"))
        }
    }
}

/// Derive MCP prompt arguments from an input schema's properties.
fn prompt_arguments(schema: Option<&Value>) -> Vec<Value> {
    let Some(schema) = schema else {
        return Vec::new();
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|properties| {
            properties
                .iter()
                .map(|(name, property)| {
                    let mut argument = json!({
                        "name": name,
                        "required": required.contains(&name.as_str()),
                    });
                    if let Some(description) = property.get("description") {
                        argument["description"] = description.clone();
                    }
                    argument
                })
                .collect()
        })
        .unwrap_or_default()
}

fn resource_contents(uri: &str, mime_type: Option<&str>, result: &ToolResult) -> Value {
    json!({
        "contents": [{
            "uri": uri,
            "mimeType": mime_type.unwrap_or("text/plain"),
            "text": result.text_content(),
        }]
    })
}

/// Match `uri` against a `{var}`-style URI template, extracting variables.
/// Literal sections must match exactly; each variable consumes up to the
/// next literal section.
pub fn match_uri_template(template: &str, uri: &str) -> Option<BTreeMap<String, String>> {
    let mut variables = BTreeMap::new();
    let mut rest = uri;
    let mut template_rest = template;

    while let Some(open) = template_rest.find('{') {
        let literal = &template_rest[..open];
        rest = rest.strip_prefix(literal)?;
        let close = template_rest[open..].find('}')? + open;
        let name = &template_rest[open + 1..close];
        template_rest = &template_rest[close + 1..];

        let value = match template_rest.find('{') {
            // Up to the next literal section, or the rest of the URI when
            // the template ends with this variable.
            _ if template_rest.is_empty() => std::mem::take(&mut rest),
            Some(next_open) => {
                let next_literal = &template_rest[..next_open];
                if next_literal.is_empty() {
                    return None; // adjacent variables are ambiguous
                }
                let end = rest.find(next_literal)?;
                let (value, remaining) = rest.split_at(end);
                rest = remaining;
                value
            }
            None => {
                let end = rest.find(template_rest)?;
                let (value, remaining) = rest.split_at(end);
                rest = remaining;
                value
            }
        };
        if value.is_empty() {
            return None;
        }
        variables.insert(name.to_string(), value.to_string());
    }

    if rest == template_rest {
        Some(variables)
    } else {
        None
    }
}

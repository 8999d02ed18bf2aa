//! CLI invoker: renders a shell-style command from config and executes it
//! as a child process.
//!
//! The rendered command is tokenized with POSIX quoting rules. Template
//! variables may carry a per-variable sub-template (`templateVariables`),
//! and variables the command string does not reference are appended as
//! trailing fragments. Combined stdout/stderr is captured up to a bounded
//! size; a non-zero exit becomes an MCP error result.

use {
    super::{
        http::{apply_patch, merge_map, remove_map_keys, unknown_patch_field},
        Invoker, InvokerEnv, InvokerFactory, Primitive, ToolResult, ValidationEnv,
    },
    crate::{
        binder::bind_arguments,
        context::RequestContext,
        error::{McpError, McpResult},
        template::{SourceRegistry, Template, TemplateBuilder, VariableSpec},
    },
    serde::{Deserialize, Serialize},
    serde_json::Value,
    std::collections::BTreeMap,
    std::process::Stdio,
    std::sync::Arc,
    tracing::{debug, warn},
};

/// Captured child output is capped here; anything past the cap is dropped
/// with a truncation marker.
const MAX_CAPTURED_OUTPUT: usize = 1024 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CliTemplateVariable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default)]
    pub omit_if_false: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CliInvocationConfig {
    pub command: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub template_variables: BTreeMap<String, CliTemplateVariable>,
}

impl CliInvocationConfig {
    pub fn from_raw(raw: &Value) -> McpResult<Self> {
        serde_json::from_value(raw.clone())
            .map_err(|e| McpError::Validation(format!("cli invocation config: {e}")))
    }

    fn variable_specs(&self) -> BTreeMap<String, VariableSpec> {
        self.template_variables
            .iter()
            .map(|(name, variable)| {
                (
                    name.clone(),
                    VariableSpec {
                        format: variable.format.clone(),
                        omit_if_false: variable.omit_if_false,
                    },
                )
            })
            .collect()
    }

    fn parse_templates(
        &self,
        schema: &Value,
        sources: &SourceRegistry,
    ) -> McpResult<ParsedCliTemplates> {
        let specs = self.variable_specs();
        let command = Template::parse_with_variables(&self.command, schema, sources, &specs)?;

        // Variables declared in templateVariables but absent from the
        // command are rendered as trailing fragments, in name order.
        let mut trailing = Vec::new();
        for (name, spec) in &specs {
            if command.position_index().contains_key(name) {
                continue;
            }
            let text = spec.format.clone().unwrap_or_else(|| format!("{{{name}}}"));
            let fragment = Template::parse(&text, schema, sources)?
                .with_omit_if_false(spec.omit_if_false)?
                .governed_by(name.clone());
            trailing.push((name.clone(), fragment));
        }

        let mut env = Vec::with_capacity(self.env.len());
        for (name, value) in &self.env {
            env.push((name.clone(), Template::parse(value, schema, sources)?));
        }
        let cwd = self
            .cwd
            .as_deref()
            .map(|text| Template::parse(text, schema, sources))
            .transpose()?;

        Ok(ParsedCliTemplates {
            command,
            trailing,
            env,
            cwd,
        })
    }
}

struct ParsedCliTemplates {
    command: Template,
    trailing: Vec<(String, Template)>,
    env: Vec<(String, Template)>,
    cwd: Option<Template>,
}

pub struct CliInvoker {
    tool: String,
    templates: ParsedCliTemplates,
    schema: Value,
    sources: SourceRegistry,
}

#[async_trait::async_trait]
impl Invoker for CliInvoker {
    async fn invoke(&self, arguments: &Value, ctx: &RequestContext) -> McpResult<ToolResult> {
        let resolvers = self.sources.resolvers_for(ctx);
        let mut command_builder = self.templates.command.builder(resolvers.clone());
        let mut trailing_builders: Vec<TemplateBuilder<'_>> = self
            .templates
            .trailing
            .iter()
            .map(|(_, template)| template.builder(resolvers.clone()))
            .collect();
        let mut env_builders: Vec<TemplateBuilder<'_>> = self
            .templates
            .env
            .iter()
            .map(|(_, template)| template.builder(resolvers.clone()))
            .collect();
        let mut cwd_builder = self
            .templates
            .cwd
            .as_ref()
            .map(|template| template.builder(resolvers));

        {
            let mut builders: Vec<&mut TemplateBuilder<'_>> = Vec::new();
            builders.push(&mut command_builder);
            builders.extend(trailing_builders.iter_mut());
            builders.extend(env_builders.iter_mut());
            if let Some(builder) = cwd_builder.as_mut() {
                builders.push(builder);
            }
            bind_arguments(&self.schema, arguments, &mut builders)?;
        }

        let mut command_line = command_builder.get_result()?;
        for builder in &trailing_builders {
            let fragment = builder.get_result()?;
            if !fragment.is_empty() {
                command_line.push(' ');
                command_line.push_str(&fragment);
            }
        }

        let argv = shlex::split(&command_line).ok_or_else(|| {
            McpError::Invocation("command has unbalanced shell quoting".to_string())
        })?;
        let Some((program, args)) = argv.split_first() else {
            return Err(McpError::Invocation("rendered command is empty".to_string()));
        };

        ctx.logger.debug(&format!("spawning `{command_line}`"));

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for ((name, _), builder) in self.templates.env.iter().zip(&env_builders) {
            command.env(name, builder.get_result()?);
        }
        if let Some(builder) = &cwd_builder {
            let cwd = builder.get_result()?;
            if !cwd.is_empty() {
                command.current_dir(cwd);
            }
        }

        // kill_on_drop tears the child down when cancellation wins the race.
        let output = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                warn!(tool = %self.tool, "child process cancelled");
                return Err(McpError::Cancelled);
            }
            output = command.output() => output.map_err(|e| {
                McpError::Invocation(format!("spawning {program:?} failed: {e}"))
            })?,
        };

        let mut combined = String::new();
        combined.push_str(&String::from_utf8_lossy(&output.stdout));
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if combined.len() > MAX_CAPTURED_OUTPUT {
            let mut cut = MAX_CAPTURED_OUTPUT;
            while !combined.is_char_boundary(cut) {
                cut -= 1;
            }
            combined.truncate(cut);
            combined.push_str("\n...output truncated");
        }

        debug!(
            tool = %self.tool,
            status = ?output.status.code(),
            bytes = combined.len(),
            "child process finished"
        );

        if output.status.success() {
            Ok(ToolResult::text(combined.trim_end()))
        } else {
            Ok(ToolResult::error(if combined.is_empty() {
                format!("command exited with status {:?}", output.status.code())
            } else {
                combined
            }))
        }
    }
}

pub struct CliInvokerFactory;

impl InvokerFactory for CliInvokerFactory {
    fn kind(&self) -> &'static str {
        "cli"
    }

    fn validate_config(
        &self,
        raw: &Value,
        primitive: &Primitive<'_>,
        env: &ValidationEnv<'_>,
    ) -> McpResult<()> {
        let config = CliInvocationConfig::from_raw(raw)?;
        if config.command.is_empty() {
            return Err(McpError::Validation(format!(
                "tool {:?}: cli invocation requires a command",
                primitive.name
            )));
        }
        config.parse_templates(primitive.input_schema, env.sources)?;
        Ok(())
    }

    fn create_invoker(
        &self,
        raw: &Value,
        primitive: &Primitive<'_>,
        env: &InvokerEnv,
    ) -> McpResult<Arc<dyn Invoker>> {
        let config = CliInvocationConfig::from_raw(raw)?;
        let templates = config.parse_templates(primitive.input_schema, &env.sources)?;
        Ok(Arc::new(CliInvoker {
            tool: primitive.name.to_string(),
            templates,
            schema: primitive.input_schema.clone(),
            sources: env.sources.clone(),
        }))
    }

    fn resolve_patches(
        &self,
        base: &Value,
        remove: Option<&Value>,
        extend: Option<&Value>,
        override_: Option<&Value>,
    ) -> McpResult<Value> {
        let mut config = CliInvocationConfig::from_raw(base)?;
        apply_patch(remove, |field, value| config.apply_remove(field, value))?;
        apply_patch(extend, |field, value| config.apply_extend(field, value))?;
        apply_patch(override_, |field, value| config.apply_override(field, value))?;
        Ok(serde_json::to_value(&config)?)
    }
}

fn string_field(value: &Value, context: &str) -> McpResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| McpError::Validation(format!("{context} must be a string")))
}

impl CliInvocationConfig {
    fn apply_remove(&mut self, field: &str, value: &Value) -> McpResult<()> {
        match field {
            "command" => self.command.clear(),
            "env" => remove_map_keys(&mut self.env, value, field)?,
            "cwd" => self.cwd = None,
            "templateVariables" => match value {
                Value::Array(keys) => {
                    for key in keys.iter().filter_map(Value::as_str) {
                        self.template_variables.remove(key);
                    }
                }
                Value::Object(keys) => {
                    for key in keys.keys() {
                        self.template_variables.remove(key);
                    }
                }
                _ => {
                    return Err(McpError::Validation(
                        "remove.templateVariables must list keys".to_string(),
                    ))
                }
            },
            other => return unknown_patch_field("cli", other),
        }
        Ok(())
    }

    fn apply_extend(&mut self, field: &str, value: &Value) -> McpResult<()> {
        match field {
            "command" => self.command.push_str(&string_field(value, "extend.command")?),
            "env" => merge_map(&mut self.env, value, field)?,
            "cwd" => {
                let suffix = string_field(value, "extend.cwd")?;
                match self.cwd.as_mut() {
                    Some(cwd) => cwd.push_str(&suffix),
                    None => self.cwd = Some(suffix),
                }
            }
            "templateVariables" => {
                let variables: BTreeMap<String, CliTemplateVariable> =
                    serde_json::from_value(value.clone()).map_err(|e| {
                        McpError::Validation(format!("extend.templateVariables: {e}"))
                    })?;
                self.template_variables.extend(variables);
            }
            other => return unknown_patch_field("cli", other),
        }
        Ok(())
    }

    fn apply_override(&mut self, field: &str, value: &Value) -> McpResult<()> {
        match field {
            "command" => self.command = string_field(value, "override.command")?,
            "env" => {
                self.env.clear();
                merge_map(&mut self.env, value, field)?;
            }
            "cwd" => self.cwd = Some(string_field(value, "override.cwd")?),
            "templateVariables" => {
                self.template_variables = serde_json::from_value(value.clone()).map_err(|e| {
                    McpError::Validation(format!("override.templateVariables: {e}"))
                })?;
            }
            other => return unknown_patch_field("cli", other),
        }
        Ok(())
    }
}

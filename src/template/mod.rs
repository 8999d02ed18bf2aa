//! Parametric string templates.
//!
//! A template interpolates three kinds of variables into literal text:
//!
//! - `{name}` — a schema parameter, possibly a dotted path into nested
//!   object properties. The formatting verb is chosen from the property's
//!   JSON-Schema type.
//! - `{env.NAME}` and `${NAME}` — a process environment variable.
//! - `{source.field}` — a field of a registered runtime source, e.g.
//!   `{headers.x-api-key}`.
//!
//! Parsing happens once at config-validation time; rendering is pure and
//! happens per request through a [`TemplateBuilder`].

mod builder;
mod source;

pub use builder::TemplateBuilder;
pub use source::{
    default_source_registry, HeadersSource, SecretsSource, SourceFactory, SourceRegistry,
    SourceResolver,
};

use {
    crate::error::{McpError, McpResult},
    serde_json::Value,
    std::collections::{BTreeMap, HashMap},
    std::sync::Arc,
};

/// Name of the implicit variable bound to the whole tool-call argument JSON.
pub const BODY_VARIABLE: &str = "_body";

/// Formatting verb, chosen from the JSON-Schema type of the bound property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Str,
    Integer,
    Number,
    Boolean,
    Any,
}

impl Verb {
    fn for_schema_type(schema_type: Option<&str>) -> Self {
        match schema_type {
            Some("string") => Verb::Str,
            Some("integer") => Verb::Integer,
            Some("number") => Verb::Number,
            Some("boolean") => Verb::Boolean,
            _ => Verb::Any,
        }
    }

    /// Render a bound JSON value with this verb.
    pub fn format(&self, path: &str, value: &Value) -> McpResult<String> {
        match self {
            Verb::Str => match value {
                Value::String(s) => Ok(s.clone()),
                other => Ok(other.to_string()),
            },
            Verb::Integer => value
                .as_i64()
                .map(|n| n.to_string())
                .ok_or_else(|| McpError::Argument(format!("parameter `{path}` is not an integer"))),
            Verb::Number => value
                .as_f64()
                .map(|n| n.to_string())
                .ok_or_else(|| McpError::Argument(format!("parameter `{path}` is not a number"))),
            Verb::Boolean => value
                .as_bool()
                .map(|b| b.to_string())
                .ok_or_else(|| McpError::Argument(format!("parameter `{path}` is not a boolean"))),
            Verb::Any => match value {
                Value::String(s) => Ok(s.clone()),
                other => Ok(other.to_string()),
            },
        }
    }
}

/// One interpolation position in a template.
#[derive(Debug, Clone)]
pub enum Slot {
    /// Bound to a (possibly dotted) schema property path.
    Param { path: String, verb: Verb },
    /// Process environment variable.
    Env { name: String },
    /// Field of a registered runtime source.
    Source { source: String, field: String },
    /// A sub-template governing a named variable (`templateVariables`).
    Nested { name: String, template: Arc<Template> },
}

#[derive(Debug, Clone)]
pub(crate) enum Segment {
    Literal(String),
    Slot(usize),
}

/// Per-variable formatting modifier attached by `templateVariables`.
#[derive(Debug, Clone, Default)]
pub struct VariableSpec {
    /// Sub-template rendered in place of the bare value, e.g. `--flag {flag}`.
    pub format: Option<String>,
    /// Render the whole fragment as `""` when the bound value is `false`.
    pub omit_if_false: bool,
}

/// A parsed template: literal segments, positional slots, and an index from
/// parameter name to the positions it fills. Duplicate references share a
/// name but occupy distinct slots.
#[derive(Debug, Clone)]
pub struct Template {
    raw: String,
    segments: Vec<Segment>,
    slots: Vec<Slot>,
    index: HashMap<String, Vec<usize>>,
    omit_if_false: bool,
    /// The variable a zero-variable fragment answers to. Without one, the
    /// builder's implicit slot accepts any path.
    governs: Option<String>,
}

impl Template {
    /// Parse `text` against `schema`, resolving dotted prefixes through the
    /// source registry.
    pub fn parse(text: &str, schema: &Value, sources: &SourceRegistry) -> McpResult<Self> {
        Self::parse_with_variables(text, schema, sources, &BTreeMap::new())
    }

    /// Parse with per-variable formatting modifiers: a referenced variable
    /// that appears in `variables` is replaced by its sub-template, which
    /// contributes its inner variable names to this template's index.
    pub fn parse_with_variables(
        text: &str,
        schema: &Value,
        sources: &SourceRegistry,
        variables: &BTreeMap<String, VariableSpec>,
    ) -> McpResult<Self> {
        let mut segments = Vec::new();
        let mut slots: Vec<Slot> = Vec::new();
        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        let mut literal = String::new();

        let chars: Vec<char> = text.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '{' => {
                    let close = find_close(&chars, i + 1)
                        .ok_or_else(|| unterminated(text, i))?;
                    let inner: String = chars[i + 1..close].iter().collect();
                    if inner.is_empty() {
                        return Err(McpError::Validation(format!(
                            "empty variable reference in template {text:?}"
                        )));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    let position = slots.len();
                    segments.push(Segment::Slot(position));
                    push_slot(
                        &inner, schema, sources, variables, &mut slots, &mut index, text,
                    )?;
                    debug_assert_eq!(slots.len(), position + 1);
                    i = close + 1;
                }
                '}' => {
                    return Err(McpError::Validation(format!(
                        "unmatched '}}' at offset {i} in template {text:?}"
                    )));
                }
                '$' if chars.get(i + 1) == Some(&'{') => {
                    let close = find_close(&chars, i + 2)
                        .ok_or_else(|| unterminated(text, i + 1))?;
                    let name: String = chars[i + 2..close].iter().collect();
                    if name.is_empty() {
                        return Err(McpError::Validation(format!(
                            "empty environment reference in template {text:?}"
                        )));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Slot(slots.len()));
                    slots.push(Slot::Env { name });
                    i = close + 1;
                }
                c => {
                    literal.push(c);
                    i += 1;
                }
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Template {
            raw: text.to_string(),
            segments,
            slots,
            index,
            omit_if_false: false,
            governs: None,
        })
    }

    /// Mark this template as omitted entirely when its single governing
    /// variable renders `false`. Rejected when more than one variable is
    /// declared; with zero variables the builder accepts any set path as
    /// the governing value.
    pub fn with_omit_if_false(mut self, omit: bool) -> McpResult<Self> {
        if omit && self.slots.len() > 1 {
            return Err(McpError::Validation(format!(
                "omitIfFalse requires at most one variable, template {:?} has {}",
                self.raw,
                self.slots.len()
            )));
        }
        self.omit_if_false = omit;
        Ok(self)
    }

    /// Name the variable that governs this template. A zero-variable
    /// fragment then only accepts `set_field` calls for that name instead
    /// of any path, so independent fragments bound in one pass cannot
    /// overwrite each other's governing value.
    pub fn governed_by(mut self, name: impl Into<String>) -> Self {
        self.governs = Some(name.into());
        self
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn omit_if_false(&self) -> bool {
        self.omit_if_false
    }

    pub(crate) fn governs(&self) -> Option<&str> {
        self.governs.as_deref()
    }

    pub(crate) fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub(crate) fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub(crate) fn position_index(&self) -> &HashMap<String, Vec<usize>> {
        &self.index
    }

    pub fn has_variables(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Names of all schema-parameter variables this template binds,
    /// including those contributed by nested sub-templates.
    pub fn param_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.index.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Start a render pass. Resolvers supply `{source.field}` lookups.
    pub fn builder(
        &self,
        resolvers: BTreeMap<String, Arc<dyn SourceResolver>>,
    ) -> TemplateBuilder<'_> {
        TemplateBuilder::new(self, resolvers)
    }
}

fn find_close(chars: &[char], from: usize) -> Option<usize> {
    chars[from..]
        .iter()
        .position(|&c| c == '}')
        .map(|offset| from + offset)
}

fn unterminated(text: &str, at: usize) -> McpError {
    McpError::Validation(format!("unterminated '{{' at offset {at} in template {text:?}"))
}

fn push_slot(
    inner: &str,
    schema: &Value,
    sources: &SourceRegistry,
    variables: &BTreeMap<String, VariableSpec>,
    slots: &mut Vec<Slot>,
    index: &mut HashMap<String, Vec<usize>>,
    text: &str,
) -> McpResult<()> {
    let position = slots.len();

    // Environment form: {env.NAME}
    if let Some(name) = inner.strip_prefix("env.") {
        slots.push(Slot::Env {
            name: name.to_string(),
        });
        return Ok(());
    }

    // Source form: a dotted prefix registered as a source.
    if let Some((prefix, field)) = inner.split_once('.') {
        if sources.contains(prefix) {
            slots.push(Slot::Source {
                source: prefix.to_string(),
                field: field.to_string(),
            });
            return Ok(());
        }
    }

    // Schema parameter, possibly governed by a templateVariables modifier.
    if let Some(spec) = variables.get(inner) {
        let sub_text = spec
            .format
            .clone()
            .unwrap_or_else(|| format!("{{{inner}}}"));
        let sub = Template::parse(&sub_text, schema, sources)?
            .with_omit_if_false(spec.omit_if_false)?
            .governed_by(inner);
        // The nested formatter answers both to the variable's own name and
        // to every parameter its sub-template binds.
        index.entry(inner.to_string()).or_default().push(position);
        for inner_path in sub.param_paths() {
            if inner_path != inner {
                index.entry(inner_path).or_default().push(position);
            }
        }
        slots.push(Slot::Nested {
            name: inner.to_string(),
            template: Arc::new(sub),
        });
        return Ok(());
    }

    let verb = resolve_param_verb(schema, inner).ok_or_else(|| {
        McpError::Validation(format!(
            "template variable {inner:?} in {text:?} does not resolve to a schema property, environment variable, or registered source"
        ))
    })?;
    index.entry(inner.to_string()).or_default().push(position);
    slots.push(Slot::Param {
        path: inner.to_string(),
        verb,
    });
    Ok(())
}

/// Resolve a (possibly dotted) parameter path against the input schema and
/// pick its formatting verb. `_body` is always valid and binds the raw
/// argument JSON.
fn resolve_param_verb(schema: &Value, path: &str) -> Option<Verb> {
    if path == BODY_VARIABLE {
        return Some(Verb::Str);
    }
    let mut current = schema;
    for part in path.split('.') {
        current = current.get("properties")?.get(part)?;
    }
    Some(Verb::for_schema_type(
        current.get("type").and_then(Value::as_str),
    ))
}

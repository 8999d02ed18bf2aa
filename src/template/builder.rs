//! Render pass over a parsed [`Template`].
//!
//! A builder holds one value slot per position, routes `set_field` calls
//! through the name → positions index (nested formatters route recursively),
//! and substitutes every slot in `get_result`. Rendering never mutates the
//! template itself.

use {
    super::{Segment, Slot, SourceResolver, Template},
    crate::error::{McpError, McpResult},
    serde_json::Value,
    std::collections::BTreeMap,
    std::sync::Arc,
};

enum SlotValue<'t> {
    Unset,
    Set(Value),
    Nested(Box<TemplateBuilder<'t>>),
}

pub struct TemplateBuilder<'t> {
    template: &'t Template,
    values: Vec<SlotValue<'t>>,
    /// Governing value for a zero-variable `omitIfFalse` template, which
    /// accepts any path.
    implicit: Option<Value>,
    resolvers: BTreeMap<String, Arc<dyn SourceResolver>>,
}

impl<'t> TemplateBuilder<'t> {
    pub(crate) fn new(
        template: &'t Template,
        resolvers: BTreeMap<String, Arc<dyn SourceResolver>>,
    ) -> Self {
        let values = template
            .slots()
            .iter()
            .map(|slot| match slot {
                Slot::Nested { template: sub, .. } => SlotValue::Nested(Box::new(
                    TemplateBuilder::new(sub.as_ref(), resolvers.clone()),
                )),
                _ => SlotValue::Unset,
            })
            .collect();
        Self {
            template,
            values,
            implicit: None,
            resolvers,
        }
    }

    /// Route `value` to every position bound to `path`. Paths this template
    /// does not reference are ignored so that one binding pass can feed
    /// several builders.
    pub fn set_field(&mut self, path: &str, value: &Value) -> McpResult<()> {
        if self.template.omit_if_false() && self.template.position_index().is_empty() {
            // A governed fragment answers only to its own variable; an
            // ungoverned one accepts any path.
            match self.template.governs() {
                Some(name) if name != path => {}
                _ => self.implicit = Some(value.clone()),
            }
            return Ok(());
        }
        let positions: Vec<usize> = match self.template.position_index().get(path) {
            Some(positions) => positions.clone(),
            None => return Ok(()),
        };
        for position in positions {
            match &mut self.values[position] {
                SlotValue::Nested(nested) => nested.set_field(path, value)?,
                slot => *slot = SlotValue::Set(value.clone()),
            }
        }
        Ok(())
    }

    /// Substitute every slot and return the rendered string. Fails when a
    /// schema parameter was never set.
    pub fn get_result(&self) -> McpResult<String> {
        if self.template.omit_if_false() && self.governing_is_false() {
            return Ok(String::new());
        }

        let mut out = String::new();
        for segment in self.template.segments() {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slot(position) => {
                    out.push_str(&self.render_slot(*position)?);
                }
            }
        }
        Ok(out)
    }

    fn render_slot(&self, position: usize) -> McpResult<String> {
        match (&self.template.slots()[position], &self.values[position]) {
            (Slot::Param { path, verb }, SlotValue::Set(value)) => verb.format(path, value),
            (Slot::Param { path, .. }, _) => Err(McpError::Argument(format!(
                "missing required parameter `{path}`"
            ))),
            (Slot::Env { name }, _) => Ok(std::env::var(name).unwrap_or_default()),
            (Slot::Source { source, field }, _) => Ok(self
                .resolvers
                .get(source)
                .and_then(|resolver| resolver.lookup(field))
                .unwrap_or_default()),
            (Slot::Nested { .. }, SlotValue::Nested(nested)) => nested.get_result(),
            (Slot::Nested { name, .. }, _) => Err(McpError::Internal(format!(
                "nested formatter `{name}` lost its builder"
            ))),
        }
    }

    fn governing_is_false(&self) -> bool {
        if self.template.position_index().is_empty() {
            return matches!(self.implicit, Some(Value::Bool(false)));
        }
        self.values
            .iter()
            .any(|value| matches!(value, SlotValue::Set(Value::Bool(false))))
    }
}

#[cfg(test)]
mod tests {
    use {
        super::super::{SourceRegistry, Template, VariableSpec},
        serde_json::json,
        std::collections::BTreeMap,
    };

    fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "recursive": { "type": "boolean" },
                "depth": { "type": "integer" }
            }
        })
    }

    #[test]
    fn renders_bound_parameters() {
        let tpl = Template::parse("ls {path}", &schema(), &SourceRegistry::new()).unwrap();
        let mut builder = tpl.builder(BTreeMap::new());
        builder.set_field("path", &json!(".")).unwrap();
        assert_eq!(builder.get_result().unwrap(), "ls .");
    }

    #[test]
    fn missing_parameter_fails() {
        let tpl = Template::parse("ls {path}", &schema(), &SourceRegistry::new()).unwrap();
        let builder = tpl.builder(BTreeMap::new());
        let err = builder.get_result().expect_err("unset parameter");
        assert!(err.to_string().contains("missing required parameter"));
    }

    #[test]
    fn duplicate_reference_fills_every_slot() {
        let tpl = Template::parse("{path}:{path}", &schema(), &SourceRegistry::new()).unwrap();
        let mut builder = tpl.builder(BTreeMap::new());
        builder.set_field("path", &json!("x")).unwrap();
        assert_eq!(builder.get_result().unwrap(), "x:x");
    }

    #[test]
    fn omit_if_false_zero_variable_fragment() {
        let tpl = Template::parse("-R", &schema(), &SourceRegistry::new())
            .unwrap()
            .with_omit_if_false(true)
            .unwrap();

        let mut builder = tpl.builder(BTreeMap::new());
        builder.set_field("recursive", &json!(false)).unwrap();
        assert_eq!(builder.get_result().unwrap(), "");

        let mut builder = tpl.builder(BTreeMap::new());
        builder.set_field("recursive", &json!(true)).unwrap();
        assert_eq!(builder.get_result().unwrap(), "-R");
    }

    #[test]
    fn governed_fragment_ignores_other_variables() {
        let tpl = Template::parse("-R", &schema(), &SourceRegistry::new())
            .unwrap()
            .with_omit_if_false(true)
            .unwrap()
            .governed_by("recursive");

        // A later foreign leaf must not overwrite the governing value.
        let mut builder = tpl.builder(BTreeMap::new());
        builder.set_field("recursive", &json!(true)).unwrap();
        builder.set_field("verbose", &json!(false)).unwrap();
        assert_eq!(builder.get_result().unwrap(), "-R");

        // And the reverse order must not resurrect an omitted fragment.
        let mut builder = tpl.builder(BTreeMap::new());
        builder.set_field("verbose", &json!(true)).unwrap();
        builder.set_field("recursive", &json!(false)).unwrap();
        assert_eq!(builder.get_result().unwrap(), "");
    }

    #[test]
    fn omit_if_false_rejects_multiple_variables() {
        let err = Template::parse("{path} {depth}", &schema(), &SourceRegistry::new())
            .unwrap()
            .with_omit_if_false(true)
            .expect_err("two variables");
        assert!(err.to_string().contains("omitIfFalse"));
    }

    #[test]
    fn nested_variable_spec_formats_fragment() {
        let mut variables = BTreeMap::new();
        variables.insert(
            "depth".to_string(),
            VariableSpec {
                format: Some("--depth {depth}".to_string()),
                omit_if_false: false,
            },
        );
        let tpl = Template::parse_with_variables(
            "find . {depth}",
            &schema(),
            &SourceRegistry::new(),
            &variables,
        )
        .unwrap();

        let mut builder = tpl.builder(BTreeMap::new());
        builder.set_field("depth", &json!(2)).unwrap();
        assert_eq!(builder.get_result().unwrap(), "find . --depth 2");
    }

    #[test]
    fn env_variable_renders_from_process_environment() {
        std::env::set_var("GENMCP_TEST_ENV_VAR", "from-env");
        let tpl =
            Template::parse("prefix-${GENMCP_TEST_ENV_VAR}", &schema(), &SourceRegistry::new())
                .unwrap();
        assert_eq!(
            tpl.builder(BTreeMap::new()).get_result().unwrap(),
            "prefix-from-env"
        );
    }
}

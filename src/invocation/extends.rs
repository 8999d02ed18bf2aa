//! Extends invoker: materializes an invoker by patching a named base config.
//!
//! Resolution applies `remove`, then `extend`, then `override` to the base
//! kind's config and delegates to the base kind's factory. A field targeted
//! by more than one operation is a validation error; base-of-base chains
//! are not supported.

use {
    super::{Invoker, InvokerEnv, InvokerFactory, Primitive, ValidationEnv},
    crate::{
        config::InvocationWrapper,
        error::{McpError, McpResult},
    },
    serde::{Deserialize, Serialize},
    serde_json::Value,
    std::collections::BTreeSet,
    std::sync::Arc,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExtendsConfig {
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extend: Option<Value>,
    #[serde(default, rename = "override", skip_serializing_if = "Option::is_none")]
    pub override_: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove: Option<Value>,
}

impl ExtendsConfig {
    pub fn from_raw(raw: &Value) -> McpResult<Self> {
        serde_json::from_value(raw.clone())
            .map_err(|e| McpError::Validation(format!("extends invocation config: {e}")))
    }

    /// Reject any field named by more than one of remove/extend/override.
    fn check_conflicts(&self) -> McpResult<()> {
        let remove = patch_fields(self.remove.as_ref());
        let extend = patch_fields(self.extend.as_ref());
        let override_ = patch_fields(self.override_.as_ref());

        for field in remove
            .intersection(&extend)
            .chain(remove.intersection(&override_))
            .chain(extend.intersection(&override_))
        {
            return Err(McpError::Validation(format!(
                "extends field {field:?} is targeted by more than one operation"
            )));
        }
        Ok(())
    }
}

fn patch_fields(patch: Option<&Value>) -> BTreeSet<String> {
    match patch {
        Some(Value::Object(object)) => object.keys().cloned().collect(),
        Some(Value::Array(fields)) => fields
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => BTreeSet::new(),
    }
}

/// Resolve an extends config into a wrapper of the base's kind.
pub fn resolve_extends(
    config: &ExtendsConfig,
    bases: &std::collections::BTreeMap<String, InvocationWrapper>,
    registry: &super::InvocationRegistry,
) -> McpResult<InvocationWrapper> {
    let base = bases.get(&config.from).ok_or_else(|| {
        McpError::Validation(format!(
            "unknown invocation base {:?}, declared bases: {:?}",
            config.from,
            bases.keys().collect::<Vec<_>>()
        ))
    })?;
    if base.kind == "extends" {
        return Err(McpError::Validation(format!(
            "invocation base {:?} is itself an extends config, chains are not supported",
            config.from
        )));
    }

    config.check_conflicts()?;

    let resolved = registry.factory(&base.kind)?.resolve_patches(
        &base.config,
        config.remove.as_ref(),
        config.extend.as_ref(),
        config.override_.as_ref(),
    )?;

    Ok(InvocationWrapper {
        kind: base.kind.clone(),
        config: resolved,
    })
}

pub struct ExtendsInvokerFactory;

impl InvokerFactory for ExtendsInvokerFactory {
    fn kind(&self) -> &'static str {
        "extends"
    }

    fn validate_config(
        &self,
        raw: &Value,
        primitive: &Primitive<'_>,
        env: &ValidationEnv<'_>,
    ) -> McpResult<()> {
        let config = ExtendsConfig::from_raw(raw)?;
        let resolved = resolve_extends(&config, env.bases, env.registry)?;
        env.registry.validate_wrapper(&resolved, primitive, env)
    }

    fn create_invoker(
        &self,
        raw: &Value,
        primitive: &Primitive<'_>,
        env: &InvokerEnv,
    ) -> McpResult<Arc<dyn Invoker>> {
        let config = ExtendsConfig::from_raw(raw)?;
        let resolved = resolve_extends(&config, &env.bases, &env.registry)?;
        env.registry.create_invoker(&resolved, primitive, env)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::invocation::InvocationRegistry, serde_json::json, std::collections::BTreeMap};

    fn bases() -> BTreeMap<String, InvocationWrapper> {
        let mut bases = BTreeMap::new();
        bases.insert(
            "api-base".to_string(),
            InvocationWrapper {
                kind: "http".to_string(),
                config: json!({
                    "method": "GET",
                    "url": "https://example/v1/{p}",
                    "headers": { "x-trace": "on", "x-team": "core" }
                }),
            },
        );
        bases
    }

    #[test]
    fn override_replaces_url() {
        let config = ExtendsConfig {
            from: "api-base".to_string(),
            override_: Some(json!({ "url": "https://example/v2/{p}" })),
            ..Default::default()
        };
        let resolved =
            resolve_extends(&config, &bases(), &InvocationRegistry::with_builtins()).unwrap();
        assert_eq!(resolved.kind, "http");
        assert_eq!(resolved.config["url"], "https://example/v2/{p}");
        assert_eq!(resolved.config["headers"]["x-trace"], "on");
    }

    #[test]
    fn remove_accepts_array_and_map_shapes() {
        for remove in [json!({ "headers": ["x-trace"] }), json!({ "headers": { "x-trace": "" } })] {
            let config = ExtendsConfig {
                from: "api-base".to_string(),
                remove: Some(json!({ "headers": remove["headers"] })),
                ..Default::default()
            };
            let resolved =
                resolve_extends(&config, &bases(), &InvocationRegistry::with_builtins()).unwrap();
            assert!(resolved.config["headers"].get("x-trace").is_none());
            assert_eq!(resolved.config["headers"]["x-team"], "core");
        }
    }

    #[test]
    fn conflicting_operations_fail() {
        let config = ExtendsConfig {
            from: "api-base".to_string(),
            extend: Some(json!({ "url": "/suffix" })),
            override_: Some(json!({ "url": "https://other/{p}" })),
            ..Default::default()
        };
        let err = resolve_extends(&config, &bases(), &InvocationRegistry::with_builtins())
            .expect_err("url targeted twice");
        assert!(err.to_string().contains("more than one operation"));
    }

    #[test]
    fn unknown_base_lists_declared_bases() {
        let config = ExtendsConfig {
            from: "missing".to_string(),
            ..Default::default()
        };
        let err = resolve_extends(&config, &bases(), &InvocationRegistry::with_builtins())
            .expect_err("unknown base");
        assert!(err.to_string().contains("api-base"));
    }

    #[test]
    fn remove_then_extend_then_override_order() {
        let config = ExtendsConfig {
            from: "api-base".to_string(),
            remove: Some(json!({ "headers": ["x-team"] })),
            extend: Some(json!({ "url": "?v=2" })),
            override_: Some(json!({ "method": "POST" })),
            ..Default::default()
        };
        let resolved =
            resolve_extends(&config, &bases(), &InvocationRegistry::with_builtins()).unwrap();
        assert_eq!(resolved.config["method"], "POST");
        assert_eq!(resolved.config["url"], "https://example/v1/{p}?v=2");
        assert!(resolved.config["headers"].get("x-team").is_none());
    }
}

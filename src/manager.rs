//! Per-scope server materialization with caching.
//!
//! Two maps guarded by reader-writer locks: one keyed by the caller's scope
//! string, one by the sorted tool-name join of the allowed tool set, so
//! distinct scope sets that admit the same tools share one server. Lookups
//! take the read lock; construction takes the write lock and re-checks both
//! maps first. Servers are retained until process exit.

use {
    crate::{
        capabilities::{
            CapabilityServer, RegisteredPrompt, RegisteredResource, RegisteredResourceTemplate,
            RegisteredTool,
        },
        config::{resource_template_schema, McpServerDefinition},
        context::RequestContext,
        error::McpResult,
        invocation::{InvocationRegistry, InvokerEnv, Primitive},
        template::SourceRegistry,
    },
    serde_json::json,
    std::collections::{BTreeSet, HashMap},
    std::sync::{Arc, RwLock},
    tracing::{debug, info},
};

/// Cache key for callers outside any authentication (stdio, auth disabled).
const UNSCOPED_KEY: &str = "*";

pub struct ServerManager {
    auth_enabled: bool,
    tools: Vec<Arc<RegisteredTool>>,
    prompts: Vec<Arc<RegisteredPrompt>>,
    resources: Vec<Arc<RegisteredResource>>,
    resource_templates: Vec<Arc<RegisteredResourceTemplate>>,
    scoped_servers: RwLock<HashMap<String, Arc<CapabilityServer>>>,
    filtered_tool_servers: RwLock<HashMap<String, Arc<CapabilityServer>>>,
}

impl ServerManager {
    /// Build every invoker up front; a config that cannot produce an
    /// invoker is fatal here, before the transport opens.
    pub fn new(
        definition: &McpServerDefinition,
        registry: Arc<InvocationRegistry>,
        sources: SourceRegistry,
        http: reqwest::Client,
    ) -> McpResult<Self> {
        let auth_enabled = definition
            .runtime
            .streamable_http_config
            .as_ref()
            .map(|config| config.auth.is_some())
            .unwrap_or(false);

        let env = InvokerEnv {
            sources,
            bases: definition.invocation_bases.clone(),
            http,
            registry: Arc::clone(&registry),
        };

        let mut tools = Vec::with_capacity(definition.tools.len());
        for def in &definition.tools {
            let primitive = Primitive {
                name: &def.name,
                input_schema: &def.input_schema,
            };
            let invoker = registry.create_invoker(&def.invocation, &primitive, &env)?;
            tools.push(Arc::new(RegisteredTool {
                def: def.clone(),
                invoker,
            }));
        }

        let empty_schema = json!({ "type": "object", "properties": {} });
        let mut prompts = Vec::with_capacity(definition.prompts.len());
        for def in &definition.prompts {
            let schema = def.input_schema.clone().unwrap_or_else(|| empty_schema.clone());
            let primitive = Primitive {
                name: &def.name,
                input_schema: &schema,
            };
            let invoker = registry.create_invoker(&def.invocation, &primitive, &env)?;
            prompts.push(Arc::new(RegisteredPrompt {
                def: def.clone(),
                invoker,
            }));
        }

        let mut resources = Vec::with_capacity(definition.resources.len());
        for def in &definition.resources {
            let primitive = Primitive {
                name: &def.name,
                input_schema: &empty_schema,
            };
            let invoker = registry.create_invoker(&def.invocation, &primitive, &env)?;
            resources.push(Arc::new(RegisteredResource {
                def: def.clone(),
                invoker,
            }));
        }

        let mut resource_templates = Vec::with_capacity(definition.resource_templates.len());
        for def in &definition.resource_templates {
            let schema = resource_template_schema(&def.uri_template);
            let primitive = Primitive {
                name: &def.name,
                input_schema: &schema,
            };
            let invoker = registry.create_invoker(&def.invocation, &primitive, &env)?;
            resource_templates.push(Arc::new(RegisteredResourceTemplate {
                def: def.clone(),
                invoker,
            }));
        }

        info!(
            tools = tools.len(),
            prompts = prompts.len(),
            resources = resources.len(),
            "capability invokers constructed"
        );

        Ok(Self {
            auth_enabled,
            tools,
            prompts,
            resources,
            resource_templates,
            scoped_servers: RwLock::new(HashMap::new()),
            filtered_tool_servers: RwLock::new(HashMap::new()),
        })
    }

    /// The server for this caller's scope set, building it on first sight.
    pub fn server_for(&self, ctx: &RequestContext) -> Arc<CapabilityServer> {
        let scope_key = if self.auth_enabled {
            scope_key(&ctx.scope_set())
        } else {
            UNSCOPED_KEY.to_string()
        };

        if let Some(server) = self
            .scoped_servers
            .read()
            .expect("scoped server lock poisoned")
            .get(&scope_key)
        {
            return Arc::clone(server);
        }

        let visible = self.visible_tools(ctx);
        let tools_key = visible.iter().cloned().collect::<Vec<_>>().join(",");

        // Clone out of the read guard before touching the scoped map, so
        // lock acquisition always runs scoped → filtered.
        let filtered_hit = self
            .filtered_tool_servers
            .read()
            .expect("filtered server lock poisoned")
            .get(&tools_key)
            .cloned();
        if let Some(server) = filtered_hit {
            self.scoped_servers
                .write()
                .expect("scoped server lock poisoned")
                .insert(scope_key, Arc::clone(&server));
            return server;
        }

        // Construction path: take both write locks and re-check, so two
        // racing requests with a fresh scope build the server once.
        let mut scoped = self
            .scoped_servers
            .write()
            .expect("scoped server lock poisoned");
        let mut filtered = self
            .filtered_tool_servers
            .write()
            .expect("filtered server lock poisoned");
        if let Some(server) = scoped.get(&scope_key) {
            return Arc::clone(server);
        }
        if let Some(server) = filtered.get(&tools_key) {
            let server = Arc::clone(server);
            scoped.insert(scope_key, Arc::clone(&server));
            return server;
        }

        debug!(scope = %scope_key, tools = %tools_key, "materializing capability server");
        let server = Arc::new(CapabilityServer::new(
            self.tools.clone(),
            visible,
            self.prompts.clone(),
            self.resources.clone(),
            self.resource_templates.clone(),
            self.auth_enabled,
        ));
        scoped.insert(scope_key, Arc::clone(&server));
        filtered.insert(tools_key, Arc::clone(&server));
        server
    }

    /// Tools whose `requiredScopes` the caller satisfies; these are the
    /// only ones `tools/list` advertises.
    fn visible_tools(&self, ctx: &RequestContext) -> BTreeSet<String> {
        if !self.auth_enabled {
            return self
                .tools
                .iter()
                .map(|tool| tool.def.name.clone())
                .collect();
        }
        let scopes = ctx.scope_set();
        self.tools
            .iter()
            .filter(|tool| {
                tool.def
                    .required_scopes
                    .iter()
                    .all(|scope| scopes.contains(scope))
            })
            .map(|tool| tool.def.name.clone())
            .collect()
    }
}

/// Scope sets cache under their sorted space-join, so `"read write"` and
/// `"write read"` land on the same entry.
fn scope_key(scopes: &BTreeSet<String>) -> String {
    scopes.iter().cloned().collect::<Vec<_>>().join(" ")
}

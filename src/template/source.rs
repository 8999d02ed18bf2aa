//! Runtime sources for `{source.field}` template variables.
//!
//! A source is registered ahead of time as a factory; at request time the
//! factory derives a resolver from the request context. The built-in sources
//! are `headers` (inbound HTTP headers of the MCP client request) and
//! `secrets` (process environment lookups kept out of client-visible output).

use {
    crate::context::RequestContext,
    std::collections::BTreeMap,
    std::sync::Arc,
};

/// Per-request lookup handle for one source.
pub trait SourceResolver: Send + Sync {
    fn lookup(&self, field: &str) -> Option<String>;
}

/// Factory registered under a source name, e.g. `headers`.
pub trait SourceFactory: Send + Sync {
    fn resolver_for(&self, ctx: &RequestContext) -> Arc<dyn SourceResolver>;
}

/// Name → factory table, written once at startup.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    factories: BTreeMap<String, Arc<dyn SourceFactory>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, factory: Arc<dyn SourceFactory>) {
        self.factories.insert(name.into(), factory);
    }

    /// Whether `name` is a registered source prefix. Dotted template
    /// variables with an unregistered prefix are nested schema paths.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Derive one resolver per source for this request.
    pub fn resolvers_for(&self, ctx: &RequestContext) -> BTreeMap<String, Arc<dyn SourceResolver>> {
        self.factories
            .iter()
            .map(|(name, factory)| (name.clone(), factory.resolver_for(ctx)))
            .collect()
    }
}

/// `{headers.<name>}` resolves against the inbound request headers,
/// case-insensitively.
pub struct HeadersSource;

struct HeadersResolver {
    headers: BTreeMap<String, String>,
}

impl SourceFactory for HeadersSource {
    fn resolver_for(&self, ctx: &RequestContext) -> Arc<dyn SourceResolver> {
        Arc::new(HeadersResolver {
            headers: ctx.headers.clone(),
        })
    }
}

impl SourceResolver for HeadersResolver {
    fn lookup(&self, field: &str) -> Option<String> {
        self.headers.get(&field.to_ascii_lowercase()).cloned()
    }
}

/// `{secrets.<NAME>}` resolves against the process environment. Secret
/// values never appear in client-visible errors; a missing secret renders
/// as an empty string, mirroring environment-variable semantics.
pub struct SecretsSource;

struct SecretsResolver;

impl SourceFactory for SecretsSource {
    fn resolver_for(&self, _ctx: &RequestContext) -> Arc<dyn SourceResolver> {
        Arc::new(SecretsResolver)
    }
}

impl SourceResolver for SecretsResolver {
    fn lookup(&self, field: &str) -> Option<String> {
        std::env::var(field).ok()
    }
}

/// The registry every server starts from: `headers` and `secrets`.
pub fn default_source_registry() -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    registry.register("headers", Arc::new(HeadersSource));
    registry.register("secrets", Arc::new(SecretsSource));
    registry
}

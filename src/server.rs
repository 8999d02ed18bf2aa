//! Server assembly: load the frozen definition, build the outbound client,
//! the scoped-server manager, and the protocol engine, then drive the
//! configured transport until shutdown.

use {
    crate::{
        auth::OAuthValidator,
        config::{load_definition, McpServerDefinition, TransportProtocol},
        context::CancellationToken,
        engine::ProtocolEngine,
        error::McpResult,
        health::HealthChecker,
        http_transport, invocation,
        manager::ServerManager,
        stdio_transport, template,
    },
    std::path::Path,
    std::sync::Arc,
    tracing::info,
};

pub struct McpServer {
    definition: Arc<McpServerDefinition>,
}

impl McpServer {
    /// Load and validate both documents; every config problem is fatal here.
    pub fn from_files(definitions_path: &Path, server_config_path: &Path) -> McpResult<Self> {
        let definition = load_definition(definitions_path, server_config_path)?;
        Ok(Self::new(definition))
    }

    pub fn new(definition: McpServerDefinition) -> Self {
        Self {
            definition: Arc::new(definition),
        }
    }

    pub fn definition(&self) -> &McpServerDefinition {
        &self.definition
    }

    /// Run until the shutdown token fires or the transport ends on its own.
    pub async fn run(&self, shutdown: CancellationToken) -> McpResult<()> {
        let definition = &self.definition;
        info!(
            name = %definition.name,
            version = %definition.version,
            "starting MCP server"
        );

        let client =
            invocation::build_http_client(definition.runtime.client_tls_config.as_ref())?;
        let manager = Arc::new(ServerManager::new(
            definition,
            invocation::default_registry(),
            template::default_source_registry(),
            client.clone(),
        )?);

        let http_config = definition.runtime.streamable_http_config.as_ref();
        let stateless = http_config.map(|config| config.stateless()).unwrap_or(true);
        let engine = Arc::new(ProtocolEngine::new(
            manager,
            definition.name.clone(),
            definition.version.clone(),
            definition.instructions.clone(),
            stateless,
        ));

        match definition.runtime.transport_protocol {
            TransportProtocol::StreamableHttp => {
                let health = Arc::new(HealthChecker::new(
                    definition.name.clone(),
                    definition.version.clone(),
                ));
                let validator = http_config.and_then(|config| {
                    config.auth.clone().map(|auth| {
                        Arc::new(OAuthValidator::new(auth, client.clone()))
                    })
                });
                http_transport::serve_http(definition, engine, health, validator, shutdown).await
            }
            TransportProtocol::Stdio => stdio_transport::serve_stdio(engine, shutdown).await,
        }
    }
}

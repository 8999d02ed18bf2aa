//! GenMCP server binary.
//!
//! Reads the tool-definitions and server-config documents named by
//! `MCP_FILE_PATH` and `MCP_SERVER_CONFIG_PATH`, then serves MCP over the
//! configured transport until SIGINT/SIGTERM.

use {
    genmcp::{CancellationToken, McpError, McpResult, McpServer},
    std::path::PathBuf,
    std::process::ExitCode,
    tracing::{error, info},
    tracing_subscriber::EnvFilter,
};

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("genmcp: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> McpResult<()> {
    let definitions_path = required_env("MCP_FILE_PATH")?;
    let server_config_path = required_env("MCP_SERVER_CONFIG_PATH")?;

    let server = McpServer::from_files(&definitions_path, &server_config_path)?;

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    server.run(shutdown).await
}

fn required_env(name: &str) -> McpResult<PathBuf> {
    std::env::var(name)
        .map(PathBuf::from)
        .map_err(|_| McpError::ConfigParse(format!("environment variable {name} is required")))
}

/// Cancel the root token on SIGINT or SIGTERM; graceful shutdown cancels
/// every in-flight handler and then closes the listener.
async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("installing SIGTERM handler failed: {e}");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
            _ = sigterm.recv() => info!("SIGTERM received"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("interrupt received");
    }
    shutdown.cancel();
}

/// `LOG_LEVEL` overrides the default filter; `RUST_LOG` still wins when set
/// because operators reach for it first.
fn init_logging() {
    let fallback = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

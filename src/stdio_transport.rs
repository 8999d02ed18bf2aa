//! Stdio transport: line-delimited JSON-RPC over stdin/stdout.
//!
//! Serves one request at a time until stdin closes or the shutdown token
//! fires. Request-scoped log notifications are flushed to stdout before the
//! response they belong to.

use {
    crate::{
        context::{CancellationToken, RequestContext},
        engine::ProtocolEngine,
        error::{McpError, McpResult},
        logging::RequestLogger,
    },
    serde_json::Value,
    std::sync::Arc,
    tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    tokio::sync::mpsc,
    tracing::{debug, info},
};

pub async fn serve_stdio(
    engine: Arc<ProtocolEngine>,
    shutdown: CancellationToken,
) -> McpResult<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    info!("serving MCP over stdio");

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            debug!("stdin closed, shutting down");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
        let ctx = RequestContext::new()
            .with_cancel(shutdown.clone())
            .with_logger(RequestLogger::new().with_notifier(notify_tx));

        let response = match serde_json::from_str::<Value>(&line) {
            Ok(message) => engine.handle_message(message, &ctx, None).await,
            Err(e) => Some(McpError::Json(e).to_json_rpc_error(None)),
        };

        // Drain log notifications raised while handling, then the response.
        while let Ok(notification) = notify_rx.try_recv() {
            write_line(&mut stdout, &notification).await?;
        }
        if let Some(response) = response {
            write_line(&mut stdout, &response).await?;
        }
    }

    Ok(())
}

async fn write_line(stdout: &mut tokio::io::Stdout, message: &Value) -> McpResult<()> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

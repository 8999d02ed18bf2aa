//! Request-scoped logging bridged to the MCP client.
//!
//! Every incoming MCP request gets a `RequestLogger` that writes to the
//! server-wide `tracing` subscriber and, when the transport keeps a live
//! notification channel, mirrors the line to the client as a
//! `notifications/message` JSON-RPC notification.

use {
    serde_json::{json, Value},
    tokio::sync::mpsc,
    uuid::Uuid,
};

#[derive(Clone)]
pub struct RequestLogger {
    request_id: String,
    notifier: Option<mpsc::UnboundedSender<Value>>,
}

impl RequestLogger {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            notifier: None,
        }
    }

    /// Attach a channel whose receiver forwards notifications to the client.
    pub fn with_notifier(mut self, notifier: mpsc::UnboundedSender<Value>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn debug(&self, message: &str) {
        tracing::debug!(request_id = %self.request_id, "{message}");
        self.notify("debug", message);
    }

    pub fn info(&self, message: &str) {
        tracing::info!(request_id = %self.request_id, "{message}");
        self.notify("info", message);
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(request_id = %self.request_id, "{message}");
        self.notify("warning", message);
    }

    pub fn error(&self, message: &str) {
        tracing::error!(request_id = %self.request_id, "{message}");
        self.notify("error", message);
    }

    fn notify(&self, level: &str, message: &str) {
        if let Some(sender) = &self.notifier {
            // A closed channel just means the client stopped listening.
            let _ = sender.send(json!({
                "jsonrpc": "2.0",
                "method": "notifications/message",
                "params": {
                    "level": level,
                    "logger": "genmcp",
                    "data": message,
                }
            }));
        }
    }
}

impl Default for RequestLogger {
    fn default() -> Self {
        Self::new()
    }
}

pub fn fmt_server_startup(port: u16) -> String {
    format!("🚀 Starting MCP Server on port {port}")
}

pub fn fmt_server_ready(addr: &str) -> String {
    format!("✅ MCP Server ready and listening on {addr}")
}

pub fn fmt_server_shutdown() -> String {
    "🛑 MCP Server shutting down".to_string()
}

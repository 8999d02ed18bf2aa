use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum McpError {
    // Startup errors
    #[error("config parse error: {0}")]
    ConfigParse(String),

    #[error("unsupported schemaVersion {found:?}: this build supports {supported:?}, migrate the document before serving")]
    SchemaVersion { found: String, supported: String },

    #[error("invalid configuration: {0}")]
    Validation(String),

    // Protocol errors
    #[error("Method not found: {0}")]
    UnknownMethod(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Not initialized")]
    NotInitialized,

    #[error("Tool not found: {0}")]
    UnknownTool(String),

    #[error("Resource not found: {0}")]
    UnknownResource(String),

    #[error("Prompt not found: {0}")]
    UnknownPrompt(String),

    #[error("Message too large: {0} bytes (max: {1})")]
    MessageTooLarge(usize, usize),

    // Request-serving errors
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("forbidden: insufficient permissions")]
    Forbidden,

    #[error("invalid arguments: {0}")]
    Argument(String),

    #[error("invocation failed: {0}")]
    Invocation(String),

    #[error("request cancelled")]
    Cancelled,

    // IO Errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Document codec errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // Internal Errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl McpError {
    /// Convert to JSON-RPC error code
    pub fn error_code(&self) -> i32 {
        match self {
            Self::UnknownMethod(_) => -32601,
            Self::InvalidParams(_) | Self::Argument(_) => -32602,
            Self::Json(_) => -32700,
            Self::NotInitialized => -32002,
            Self::UnknownTool(_) | Self::UnknownResource(_) | Self::UnknownPrompt(_) => -32601,
            Self::MessageTooLarge(_, _) => -32000,
            Self::Auth(_) | Self::Forbidden => -32003,
            Self::Cancelled => -32800,
            _ => -32603, // Internal error
        }
    }

    /// Create JSON-RPC error response
    pub fn to_json_rpc_error(&self, id: Option<Value>) -> Value {
        serde_json::json!({
            "jsonrpc": "2.0",
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            },
            "id": id,
        })
    }

    /// Process exit code for startup failures: 2 for a schema-version
    /// mismatch, 1 for every other config or bind error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::SchemaVersion { .. } => 2,
            _ => 1,
        }
    }
}

// Result type alias for convenience
pub type McpResult<T> = Result<T, McpError>;

// For compatibility with handler code that uses anyhow::Error
impl From<anyhow::Error> for McpError {
    fn from(err: anyhow::Error) -> Self {
        McpError::Internal(err.to_string())
    }
}

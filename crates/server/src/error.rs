//! Error types for the MCP server.

use thiserror::Error;

/// Main error type for the server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration errors (invalid YAML/JSON, missing spec, unsupported transport)
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration error: failed to read '{path}': {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Startup errors (HTTP client or listener could not be created)
    #[error("Startup error: {0}")]
    Startup(String),

    /// Tool compilation errors
    #[error(transparent)]
    Compile(#[from] toolsmith_openapi_tools::OpenApiToolsError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

//! Error types for `toolsmith-openapi-tools`.

use thiserror::Error;

/// Main error type for compiling `OpenAPI` documents into tools.
#[derive(Error, Debug)]
pub enum OpenApiToolsError {
    /// `OpenAPI` errors (document shape, unusable references).
    #[error("OpenAPI error: {0}")]
    OpenApi(String),

    #[error("OpenAPI error: failed to fetch spec from '{url}': {message}")]
    SpecFetch { url: String, message: String },

    #[error("OpenAPI error: failed to read spec file '{path}': {source}")]
    SpecReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("OpenAPI error: failed to parse spec from '{location}': {message}")]
    SpecParse { location: String, message: String },

    /// A `$ref` chain that loops back onto itself.
    #[error("Cyclic $ref detected while resolving: {0}")]
    CyclicRef(String),

    /// Two operations produced the same tool name and the collision policy forbids renaming.
    #[error("Tool name collision: '{name}' is produced by both {first} and {second}")]
    NamingCollision {
        name: String,
        first: String,
        second: String,
    },

    /// The description enhancer could not be used; callers fall back to the plain tool.
    #[error("Enhancement unavailable: {0}")]
    EnhancementUnavailable(String),

    /// JSON parsing errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for compiler operations.
pub type Result<T> = std::result::Result<T, OpenApiToolsError>;

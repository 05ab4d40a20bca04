//! OpenAPI -> MCP tool compiler.
//!
//! Loads an `OpenAPI`-style document, resolves local `$ref`s, synthesizes tool names and builds
//! an ordered [`compiler::ToolRegistry`]. Tool calls are executed by `toolsmith-http-tools`.

pub mod compiler;
pub mod config;
pub mod document;
pub mod enhance;
pub mod error;
pub mod naming;
pub mod resolver;
pub mod schema;

pub use compiler::{ToolCompiler, ToolDefinition, ToolRegistry};
pub use document::ApiDocument;
pub use error::{OpenApiToolsError, Result};

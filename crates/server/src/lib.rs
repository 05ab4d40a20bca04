//! MCP server for tools compiled from an `OpenAPI` document.
//!
//! [`app::build_context`] loads and compiles the document once; transports then run one
//! [`session::ProtocolSession`] per connection against that shared, read-only context.

pub mod app;
pub mod config;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod session;
pub mod transport;

pub use error::{Result, ServerError};

//! Handler specs and the upstream HTTP runtime behind toolsmith tools.
//!
//! This crate knows nothing about `OpenAPI` documents or MCP; it turns a [`handler::HandlerSpec`]
//! plus call arguments into one upstream HTTP request and folds the outcome into a JSON value.

pub mod handler;
pub mod runtime;
pub mod semantics;

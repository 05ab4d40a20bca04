//! Transport adapters. Each one feeds messages into a [`crate::session::ProtocolSession`].

pub mod http;
pub mod sessions;
pub mod sse;
pub mod stdio;

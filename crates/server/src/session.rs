//! Per-connection MCP protocol state machine.
//!
//! A session starts `Uninitialized`; `initialize` moves it to `Initialized`. `tools/list` and
//! `tools/call` are refused until then. Replies echo the request id verbatim, and requests
//! without an id are notifications that never get a reply.

use crate::app::ServerContext;
use crate::protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, ToolResult,
};
use futures::FutureExt as _;
use serde_json::{Value, json};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
}

pub struct ProtocolSession {
    ctx: Arc<ServerContext>,
    state: SessionState,
}

impl ProtocolSession {
    #[must_use]
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self {
            ctx,
            state: SessionState::Uninitialized,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle one raw message. Unparseable text yields a `-32700` reply with a `null` id.
    pub async fn handle_text(&mut self, text: &str) -> Option<JsonRpcResponse> {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => self.handle_value(value).await,
            Err(e) => {
                tracing::debug!("Parse error: {e}");
                Some(JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error()))
            }
        }
    }

    /// Handle one decoded message. JSON that is not a request object yields `-32600`.
    pub async fn handle_value(&mut self, value: Value) -> Option<JsonRpcResponse> {
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                tracing::debug!("Invalid request: {e}");
                Some(JsonRpcResponse::error(id, JsonRpcError::invalid_request()))
            }
        }
    }

    pub async fn handle(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        tracing::debug!(method = %request.method, "handling request");

        let outcome = match request.method.as_str() {
            "initialize" => {
                self.state = SessionState::Initialized;
                Ok(self.initialize_result())
            }
            "notifications/initialized" => return None,
            "ping" => Ok(json!({})),
            "tools/list" => self
                .require_initialized()
                .map(|()| json!({ "tools": self.ctx.registry })),
            "tools/call" => match self.require_initialized() {
                Ok(()) => self.call_tool(request.params.as_ref()).await,
                Err(e) => Err(e),
            },
            _ => Err(JsonRpcError::method_not_found()),
        };

        let id = request.id?;
        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::error(id, error),
        })
    }

    fn require_initialized(&self) -> Result<(), JsonRpcError> {
        match self.state {
            SessionState::Initialized => Ok(()),
            SessionState::Uninitialized => Err(JsonRpcError::not_initialized()),
        }
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {"listChanged": false}},
            "serverInfo": self.ctx.server_info,
        })
    }

    async fn call_tool(&self, params: Option<&Value>) -> Result<Value, JsonRpcError> {
        let Some(params) = params.filter(|p| p.as_object().is_some_and(|o| !o.is_empty())) else {
            return Err(JsonRpcError::invalid_params("Missing parameters"));
        };
        let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => json!({}),
            Some(args) => args.clone(),
        };

        let output = run_tool(&self.ctx, name, arguments).await?;
        serde_json::to_value(ToolResult::from_handler_output(&output))
            .map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }
}

/// Look up and run a tool, shielding the caller from handler errors and panics.
///
/// # Errors
///
/// `-32602 "Tool not found"` for a name outside the registry, `-32603 "Handler not
/// implemented"` for a tool without a bound handler, and `-32603 "Internal error"` when the
/// handler fails or panics.
pub async fn run_tool(
    ctx: &ServerContext,
    name: &str,
    arguments: Value,
) -> Result<Value, JsonRpcError> {
    if ctx.registry.get(name).is_none() {
        return Err(JsonRpcError::invalid_params("Tool not found"));
    }
    let Some(handler) = ctx.handlers.get(name) else {
        return Err(JsonRpcError::internal_error("Handler not implemented"));
    };

    match AssertUnwindSafe(handler.call(arguments)).catch_unwind().await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => {
            tracing::error!("Error calling tool {name}: {e:#}");
            Err(JsonRpcError::internal_error("Internal error"))
        }
        Err(_) => {
            tracing::error!("Tool handler for {name} panicked");
            Err(JsonRpcError::internal_error("Internal error"))
        }
    }
}

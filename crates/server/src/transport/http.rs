//! JSON-RPC over HTTP, plus the legacy REST endpoints and the optional SSE stream.
//!
//! Sessions are keyed by the `Mcp-Session-Id` header, falling back to the TCP connection when
//! the header is absent. `initialize` without a known id creates a session and returns its id in
//! that header. Any other request that resolves to no session is served by a throwaway
//! uninitialized one.

use crate::app::ServerContext;
use crate::config::Protocol;
use crate::error::{Result, ServerError};
use crate::protocol::{INTERNAL_ERROR, JsonRpcError, JsonRpcResponse};
use crate::session::{ProtocolSession, run_tool};
use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use super::sessions::{ConnectionId, SessionStore};
use super::sse::{DEFAULT_HEARTBEAT_INTERVAL, sse_handler};

pub const SESSION_HEADER: &str = "Mcp-Session-Id";

#[derive(Clone)]
pub struct HttpState {
    pub ctx: Arc<ServerContext>,
    pub sessions: Arc<SessionStore>,
    pub protocol: Protocol,
    pub heartbeat: Duration,
    pub started: Instant,
}

impl HttpState {
    #[must_use]
    pub fn new(ctx: Arc<ServerContext>, protocol: Protocol) -> Self {
        Self {
            ctx,
            sessions: Arc::new(SessionStore::default()),
            protocol,
            heartbeat: DEFAULT_HEARTBEAT_INTERVAL,
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    #[must_use]
    pub fn with_session_limits(mut self, idle_timeout: Duration, max_sessions: usize) -> Self {
        self.sessions = Arc::new(SessionStore::new(idle_timeout, max_sessions));
        self
    }
}

/// Build the router. `with_sse` mounts `GET /sse`.
pub fn router(state: HttpState, with_sse: bool) -> Router {
    let mut app = Router::new()
        .route("/", get(status).post(jsonrpc).delete(close_session))
        .route("/health", get(health))
        .route("/mcp", get(list_tools))
        .route("/mcp/call", post(call_tool));
    if with_sse {
        app = app.route("/sse", get(sse_handler));
    }
    app.layer(CorsLayer::permissive()).with_state(state)
}

/// Bind `bind` and serve until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve<F>(state: HttpState, with_sse: bool, bind: &str, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|e| ServerError::Startup(format!("failed to bind {bind}: {e}")))?;
    tracing::info!(
        address = %listener.local_addr()?,
        protocol = %state.protocol,
        sse = with_sse,
        "Serving MCP over HTTP"
    );
    serve_on(listener, state, with_sse, shutdown).await?;
    tracing::info!("HTTP server shutdown complete");
    Ok(())
}

/// Serve on an already bound listener. Every request carries its [`ConnectionId`].
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve_on<F>(
    listener: TcpListener,
    state: HttpState,
    with_sse: bool,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state, with_sse).into_make_service_with_connect_info::<ConnectionId>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn status(State(state): State<HttpState>) -> Json<Value> {
    Json(json!({"message": "MCP Server is running", "protocol": state.protocol}))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok())
}

async fn jsonrpc(
    State(state): State<HttpState>,
    ConnectInfo(conn): ConnectInfo<ConnectionId>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!("Parse error: {e}");
            let reply = JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error());
            return Json(reply).into_response();
        }
    };

    let is_initialize = value.get("method").and_then(Value::as_str) == Some("initialize");
    let header = session_id(&headers);
    // A header-less initialize always starts over on this connection.
    let known = if is_initialize && header.is_none() {
        None
    } else {
        state.sessions.lookup(header, &conn)
    };

    let (new_id, session) = match known {
        Some(session) => (None, session),
        None if is_initialize => {
            let (id, session) = state.sessions.create(&state.ctx, &conn);
            tracing::debug!(session = %id, peer = %conn.peer(), "created HTTP session");
            (Some(id), session)
        }
        None => (
            None,
            Arc::new(tokio::sync::Mutex::new(ProtocolSession::new(state.ctx.clone()))),
        ),
    };

    let reply = session.lock().await.handle_value(value).await;

    let mut response = match reply {
        Some(reply) => Json(reply).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    if let Some(id) = new_id
        && let Ok(header) = HeaderValue::from_str(&id)
    {
        response.headers_mut().insert(SESSION_HEADER, header);
    }
    response
}

async fn close_session(State(state): State<HttpState>, headers: HeaderMap) -> StatusCode {
    match session_id(&headers) {
        Some(id) if state.sessions.remove(id) => {
            tracing::debug!(session = %id, "closed HTTP session");
            StatusCode::NO_CONTENT
        }
        _ => StatusCode::NOT_FOUND,
    }
}

async fn list_tools(State(state): State<HttpState>) -> Json<Value> {
    Json(json!({"tools": state.ctx.registry}))
}

#[derive(Debug, Deserialize)]
struct ToolCallRequest {
    tool_name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

async fn call_tool(
    State(state): State<HttpState>,
    Json(request): Json<ToolCallRequest>,
) -> Response {
    let arguments = request.arguments.unwrap_or_else(|| json!({}));
    match run_tool(&state.ctx, &request.tool_name, arguments).await {
        Ok(result) => Json(json!({"result": result})).into_response(),
        Err(e) => {
            let status = if e.code == INTERNAL_ERROR {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                StatusCode::NOT_FOUND
            };
            (status, Json(json!({"detail": e.message}))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{HandlerTable, ToolHandler};
    use crate::protocol::ServerInfo;
    use async_trait::async_trait;
    use toolsmith_openapi_tools::{ApiDocument, ToolCompiler};

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, arguments: Value) -> anyhow::Result<Value> {
            Ok(json!({"echo": arguments}))
        }
    }

    fn state() -> HttpState {
        let doc = ApiDocument::from_value(json!({
            "paths": {"/users": {"get": {}, "post": {}}}
        }))
        .unwrap();
        let registry = ToolCompiler::default().compile(&doc).unwrap();
        let mut handlers = HandlerTable::new();
        handlers.insert("get_users", Arc::new(Echo));
        let ctx = Arc::new(ServerContext::new(
            registry,
            handlers,
            ServerInfo {
                name: "Test".to_string(),
                version: "1.0.0".to_string(),
            },
        ));
        HttpState::new(ctx, Protocol::Http)
    }

    async fn serve_state(
        state: HttpState,
        with_sse: bool,
    ) -> (String, tokio::sync::oneshot::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = serve_on(listener, state, with_sse, async move {
                let _ = shutdown_rx.await;
            })
            .await;
        });
        (format!("http://{addr}"), shutdown_tx)
    }

    async fn serve() -> (String, tokio::sync::oneshot::Sender<()>) {
        serve_state(state(), false).await
    }

    #[tokio::test]
    async fn sessions_are_isolated_by_header() {
        let state = state();
        let sessions = state.sessions.clone();
        let (base, _shutdown) = serve_state(state, false).await;
        let client = reqwest::Client::new();

        let init = client
            .post(&base)
            .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"}))
            .send()
            .await
            .unwrap();
        let sid = init
            .headers()
            .get(SESSION_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert_eq!(sessions.len(), 1);

        let listed: Value = client
            .post(&base)
            .header(SESSION_HEADER, &sid)
            .json(&json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed["result"]["tools"][0]["name"], json!("get_users"));

        // A fresh client means a fresh connection, which owns no session.
        let anonymous: Value = reqwest::Client::new()
            .post(&base)
            .json(&json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(anonymous["error"]["code"], json!(-32002));

        let closed = client
            .delete(&base)
            .header(SESSION_HEADER, &sid)
            .send()
            .await
            .unwrap();
        assert_eq!(closed.status(), StatusCode::NO_CONTENT);
        assert!(sessions.is_empty());

        let after_close: Value = client
            .post(&base)
            .header(SESSION_HEADER, &sid)
            .json(&json!({"jsonrpc": "2.0", "id": 4, "method": "tools/list"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(after_close["error"]["code"], json!(-32002));
    }

    #[tokio::test]
    async fn header_less_client_keeps_its_session_on_one_connection() {
        let (base, _shutdown) = serve().await;
        let client = reqwest::Client::new();
        let rpc = |id: i64, method: &str| json!({"jsonrpc": "2.0", "id": id, "method": method});

        let init = client.post(&base).json(&rpc(1, "initialize")).send().await.unwrap();
        assert!(init.headers().contains_key(SESSION_HEADER));
        let _: Value = init.json().await.unwrap();

        let listed: Value = client
            .post(&base)
            .json(&rpc(2, "tools/list"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed["id"], json!(2));
        assert_eq!(listed["result"]["tools"][0]["name"], json!("get_users"));

        let other: Value = reqwest::Client::new()
            .post(&base)
            .json(&rpc(3, "tools/list"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(other["error"]["code"], json!(-32002));
    }

    #[tokio::test]
    async fn repeated_header_less_initialize_does_not_grow_the_store() {
        let state = state().with_session_limits(Duration::from_secs(60), 8);
        let sessions = state.sessions.clone();
        let (base, _shutdown) = serve_state(state, false).await;

        let client = reqwest::Client::new();
        for id in 0..200 {
            let _: Value = client
                .post(&base)
                .json(&json!({"jsonrpc": "2.0", "id": id, "method": "initialize"}))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
        }
        assert_eq!(sessions.len(), 1);

        // Clients that each take a session id and hold on to it are capped instead.
        for id in 0..20 {
            let _: Value = reqwest::Client::new()
                .post(&base)
                .json(&json!({"jsonrpc": "2.0", "id": id, "method": "initialize"}))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
        }
        assert_eq!(sessions.len(), 8);
    }

    #[tokio::test]
    async fn notifications_and_parse_errors() {
        let (base, _shutdown) = serve().await;
        let client = reqwest::Client::new();

        let note = client
            .post(&base)
            .json(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .send()
            .await
            .unwrap();
        assert_eq!(note.status(), StatusCode::ACCEPTED);

        let garbage: Value = client
            .post(&base)
            .body("{oops")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(
            garbage,
            json!({"jsonrpc": "2.0", "id": null, "error": {"code": -32700, "message": "Parse error"}})
        );
    }

    #[tokio::test]
    async fn legacy_rest_endpoints() {
        let (base, _shutdown) = serve().await;
        let client = reqwest::Client::new();

        let status: Value = client.get(&base).send().await.unwrap().json().await.unwrap();
        assert_eq!(
            status,
            json!({"message": "MCP Server is running", "protocol": "http"})
        );

        let tools: Value = client
            .get(format!("{base}/mcp"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(tools["tools"].as_array().unwrap().len(), 2);

        let ok: Value = client
            .post(format!("{base}/mcp/call"))
            .json(&json!({"tool_name": "get_users", "arguments": {"q": 1}}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(ok, json!({"result": {"echo": {"q": 1}}}));

        let unknown = client
            .post(format!("{base}/mcp/call"))
            .json(&json!({"tool_name": "nope"}))
            .send()
            .await
            .unwrap();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        let unbound = client
            .post(format!("{base}/mcp/call"))
            .json(&json!({"tool_name": "create_user"}))
            .send()
            .await
            .unwrap();
        assert_eq!(unbound.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = unbound.json().await.unwrap();
        assert_eq!(body, json!({"detail": "Handler not implemented"}));
    }

    #[tokio::test]
    async fn sse_route_only_when_enabled() {
        let (base, _shutdown) = serve().await;
        let missing = reqwest::get(format!("{base}/sse")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let state = state().with_heartbeat(Duration::from_millis(20));
        let (base, _shutdown) = serve_state(state, true).await;
        let mut resp = reqwest::get(format!("{base}/sse")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let mut seen = String::new();
        while seen.matches("heartbeat").count() < 2 {
            let chunk = tokio::time::timeout(Duration::from_secs(5), resp.chunk())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            seen.push_str(&String::from_utf8_lossy(&chunk));
        }
        let first = seen.find("connected").unwrap();
        assert!(first < seen.find("heartbeat").unwrap());
    }
}

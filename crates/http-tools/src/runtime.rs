//! Runtime for executing tool calls against the upstream API.
//!
//! [`HandlerRuntime::invoke`] never fails: every problem (missing argument, upstream error
//! status, transport failure, timeout) is reported as an `{"error": "..."}` payload so the
//! protocol layer can surface it as a tool-level error.

use crate::handler::{BoundRequest, HandlerSpec};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Default bound on a single upstream call.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum HttpToolsError {
    #[error("config error: {0}")]
    Config(String),
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("{0}")]
    Transport(String),
    #[error("Upstream request timed out after {0}ms")]
    Timeout(u128),
}

pub type Result<T> = std::result::Result<T, HttpToolsError>;

impl From<reqwest::Error> for HttpToolsError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(sanitize_reqwest_error(&value))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
}

/// Outbound channel used by the runtime.
///
/// Production code uses [`ReqwestTransport`]; tests substitute in-memory stubs.
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| HttpToolsError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UpstreamTransport for ReqwestTransport {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse> {
        let mut builder = self.client.request(request.method, request.url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(UpstreamResponse { status, body })
    }
}

#[derive(Clone)]
pub struct HandlerRuntime {
    inner: Arc<HandlerRuntimeInner>,
}

struct HandlerRuntimeInner {
    base_url: String,
    transport: Arc<dyn UpstreamTransport>,
    timeout: Duration,
}

impl HandlerRuntime {
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        transport: Arc<dyn UpstreamTransport>,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(HandlerRuntimeInner {
                base_url: base_url.into(),
                transport,
                timeout,
            }),
        }
    }

    /// Build a runtime backed by a real HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn with_reqwest(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let transport = ReqwestTransport::new()?;
        Ok(Self::new(base_url, Arc::new(transport), timeout))
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Execute one tool call, folding every failure into an `{"error": ...}` payload.
    pub async fn invoke(&self, spec: &HandlerSpec, arguments: &Value) -> Value {
        match self.execute(spec, arguments).await {
            Ok(v) => v,
            Err(e) => {
                debug!(tool = %spec.tool_name, error = %e, "tool call produced an error payload");
                json!({ "error": e.to_string() })
            }
        }
    }

    /// Execute one tool call.
    ///
    /// Successful responses are parsed as JSON; a body that is not JSON is wrapped as
    /// `{"result": <text>}`.
    ///
    /// # Errors
    ///
    /// Returns an error if a required argument is missing, the URL cannot be built, the
    /// transport fails or times out, or the upstream answers with a status of 400 or above.
    pub async fn execute(&self, spec: &HandlerSpec, arguments: &Value) -> Result<Value> {
        let BoundRequest { path, query, body } = spec.bind(arguments)?;
        let url = build_url(&self.inner.base_url, &path, &query)?;
        let request = UpstreamRequest {
            method: spec.method.clone(),
            url,
            body: body.map(Value::Object),
        };

        let timeout = self.inner.timeout;
        let response = match tokio::time::timeout(timeout, self.inner.transport.send(request)).await
        {
            Ok(r) => r?,
            Err(_) => return Err(HttpToolsError::Timeout(timeout.as_millis())),
        };

        if response.status >= 400 {
            return Err(HttpToolsError::Status {
                status: response.status,
                body: response.body,
            });
        }

        match serde_json::from_str::<Value>(&response.body) {
            Ok(v) => Ok(v),
            Err(_) => Ok(json!({ "result": response.body })),
        }
    }
}

fn build_url(base_url: &str, path: &str, query: &[(String, String)]) -> Result<Url> {
    let joined = format!("{}{}", base_url.trim_end_matches('/'), path);
    let mut url =
        Url::parse(&joined).map_err(|e| HttpToolsError::Runtime(format!("Invalid URL: {e}")))?;
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in query {
            pairs.append_pair(k, v);
        }
    }
    Ok(url)
}

/// Strip credentials, query and fragment from a URL before it is shown to callers.
#[must_use]
pub fn redact_url(url: &Url) -> String {
    let mut u = url.clone();
    let _ = u.set_username("");
    let _ = u.set_password(None);
    u.set_query(None);
    u.set_fragment(None);
    u.to_string()
}

fn sanitize_reqwest_error(e: &reqwest::Error) -> String {
    let msg = e.to_string();
    match e.url() {
        Some(u) => msg.replace(u.as_str(), &redact_url(u)),
        None => msg,
    }
}

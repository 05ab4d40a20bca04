//! Startup: load the document, compile tools and bind handlers.

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::handlers::HandlerTable;
use crate::protocol::ServerInfo;
use reqwest::Client;
use std::sync::Arc;
use toolsmith_http_tools::runtime::{HandlerRuntime, ReqwestTransport};
use toolsmith_openapi_tools::enhance::ChatCompletionsEnhancer;
use toolsmith_openapi_tools::{ApiDocument, ToolCompiler, ToolRegistry};

/// Read-only state shared by every session.
#[derive(Debug)]
pub struct ServerContext {
    pub registry: ToolRegistry,
    pub handlers: HandlerTable,
    pub server_info: ServerInfo,
}

impl ServerContext {
    #[must_use]
    pub fn new(registry: ToolRegistry, handlers: HandlerTable, server_info: ServerInfo) -> Self {
        Self {
            registry,
            handlers,
            server_info,
        }
    }
}

/// Build the shared server state from configuration.
///
/// # Errors
///
/// Returns an error if no spec is configured, the spec cannot be loaded or compiled, or the HTTP
/// client cannot be created.
pub async fn build_context(config: &ServerConfig) -> Result<Arc<ServerContext>> {
    let spec = config.spec.as_deref().ok_or_else(|| {
        ServerError::Config("no OpenAPI spec given (use --spec or `spec:` in the config file)".into())
    })?;

    let client = Client::builder()
        .build()
        .map_err(|e| ServerError::Startup(format!("failed to build HTTP client: {e}")))?;

    let doc = ApiDocument::load(spec, &client).await?;
    let registry = compile(config, &doc, &client).await?;

    let base_url = config.upstream_base_url(&doc);
    let runtime = HandlerRuntime::new(
        base_url.clone(),
        Arc::new(ReqwestTransport::with_client(client)),
        config.upstream_timeout(),
    );
    let handlers = HandlerTable::from_registry(&registry, &runtime);

    let server_info = ServerInfo {
        name: config.server_name(&doc),
        version: config.version.clone(),
    };

    tracing::info!(
        name = %server_info.name,
        version = %server_info.version,
        description = %config.server_description(&doc),
        author = %config.author,
        protocols = %config.protocol_list(),
        base_url = %base_url,
        tools = registry.len(),
        "MCP server metadata"
    );

    Ok(Arc::new(ServerContext::new(registry, handlers, server_info)))
}

async fn compile(config: &ServerConfig, doc: &ApiDocument, client: &Client) -> Result<ToolRegistry> {
    let compiler = ToolCompiler::new(config.compiler_config());
    let enhancement = &config.enhancement;

    if !enhancement.enabled {
        return Ok(compiler.compile(doc)?);
    }
    if enhancement.resolve_api_key().is_none() {
        tracing::warn!(
            "Enhancement is enabled but no API key is set (apiKey or ${}); skipping",
            enhancement.api_key_env
        );
        return Ok(compiler.compile(doc)?);
    }

    tracing::info!("Enhancing tool descriptions with {}", enhancement.model);
    let enhancer = ChatCompletionsEnhancer::new(client.clone(), enhancement);
    Ok(compiler
        .compile_with_enhancer(doc, &enhancer, enhancement.timeout())
        .await?)
}

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tokio::signal;
use toolsmith_mcp_server::app::build_context;
use toolsmith_mcp_server::config::{Protocol, ServerConfig};
use toolsmith_mcp_server::transport::{http, stdio};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Serve the operations of an `OpenAPI` document as MCP tools.
#[derive(Debug, Parser)]
#[command(name = "toolsmith-mcp-server", version, about)]
struct Cli {
    /// `OpenAPI` document (file path or http(s) URL). Overrides `spec` in the config file.
    #[arg(long, env = "TOOLSMITH_SPEC")]
    spec: Option<String>,

    /// YAML or JSON configuration file.
    #[arg(long, env = "TOOLSMITH_CONFIG")]
    config: Option<PathBuf>,

    /// Transport to run; must be listed in `protocolTypes`. Defaults to the first one.
    #[arg(long, value_enum, env = "TOOLSMITH_TRANSPORT")]
    transport: Option<Protocol>,

    /// Listen address for the HTTP and SSE transports.
    #[arg(long, env = "TOOLSMITH_BIND")]
    bind: Option<String>,

    /// Upstream API base URL. Overrides the document's servers.
    #[arg(long, env = "TOOLSMITH_BASE_URL")]
    base_url: Option<String>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, env = "TOOLSMITH_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, env = "TOOLSMITH_LOG_FORMAT", default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);

    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if cli.spec.is_some() {
        config.spec.clone_from(&cli.spec);
    }
    if cli.base_url.is_some() {
        config.base_url.clone_from(&cli.base_url);
    }
    if let Some(bind) = &cli.bind {
        config.bind.clone_from(bind);
    }
    // Without a config file, --transport alone decides which transport is enabled.
    if let Some(t) = cli.transport
        && cli.config.is_none()
        && !config.protocol_types.contains(&t)
    {
        config.protocol_types = vec![t];
    }

    let transport = config.select_transport(cli.transport)?;
    let ctx = build_context(&config).await?;

    match transport {
        Protocol::Stdio => {
            tokio::select! {
                res = stdio::serve_stdio(ctx) => res?,
                () = shutdown_signal() => {}
            }
        }
        Protocol::Http | Protocol::Sse => {
            let with_sse = transport == Protocol::Sse || config.protocol_types.contains(&Protocol::Sse);
            let state = http::HttpState::new(ctx, transport)
                .with_session_limits(config.session_idle_timeout(), config.max_sessions);
            http::serve(state, with_sse, &config.bind, shutdown_signal()).await?;
        }
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Logs always go to stderr; stdout belongs to the stdio transport.
fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

//! Server configuration file.
//!
//! Loaded from YAML (JSON is accepted too, being a subset). Keys may be written in camelCase or
//! snake_case. Everything is optional; CLI flags override file values.

use crate::error::{Result, ServerError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use toolsmith_http_tools::runtime::DEFAULT_UPSTREAM_TIMEOUT;
use toolsmith_openapi_tools::config::{CollisionPolicy, CompilerConfig, EnhancementConfig};
use toolsmith_openapi_tools::document::ApiDocument;

pub const DEFAULT_SERVER_NAME: &str = "Generated MCP Server";
pub const DEFAULT_SERVER_DESCRIPTION: &str = "MCP Server generated from API spec";
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_SESSION_IDLE_TIMEOUT_SECS: u64 = 30 * 60;
pub const DEFAULT_MAX_SESSIONS: usize = 1024;

/// A transport the server can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Stdio,
    Http,
    Sse,
}

impl Protocol {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
            Self::Sse => "sse",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// `OpenAPI` document path or `http(s)` URL.
    #[serde(default)]
    pub spec: Option<String>,

    /// Server name advertised in `initialize`. Defaults to the document's `info.title`.
    #[serde(default, alias = "mcp_name")]
    pub mcp_name: Option<String>,

    /// Defaults to the document's `info.description`.
    #[serde(default)]
    pub description: Option<String>,

    /// Enabled transports. The first one is used unless `--transport` picks another.
    #[serde(default = "default_protocol_types", alias = "protocol_types")]
    pub protocol_types: Vec<Protocol>,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub author: String,

    /// Upstream API base URL. Overrides the document's `servers[0].url`.
    #[serde(default, alias = "base_url")]
    pub base_url: Option<String>,

    /// Listen address for the HTTP and SSE transports.
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_upstream_timeout_secs", alias = "upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,

    /// HTTP sessions unused for this long are evicted.
    #[serde(
        default = "default_session_idle_timeout_secs",
        alias = "session_idle_timeout_secs"
    )]
    pub session_idle_timeout_secs: u64,

    /// Upper bound on live HTTP sessions; the least recently used one is evicted beyond it.
    #[serde(default = "default_max_sessions", alias = "max_sessions")]
    pub max_sessions: usize,

    #[serde(default, alias = "selected_tools")]
    pub selected_tools: Option<Vec<String>>,

    #[serde(default, alias = "collision_policy")]
    pub collision_policy: CollisionPolicy,

    #[serde(default)]
    pub enhancement: EnhancementConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            spec: None,
            mcp_name: None,
            description: None,
            protocol_types: default_protocol_types(),
            version: default_version(),
            author: String::new(),
            base_url: None,
            bind: default_bind(),
            upstream_timeout_secs: default_upstream_timeout_secs(),
            session_idle_timeout_secs: default_session_idle_timeout_secs(),
            max_sessions: default_max_sessions(),
            selected_tools: None,
            collision_policy: CollisionPolicy::default(),
            enhancement: EnhancementConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML or JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the result is invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ServerError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns an error if no transport is enabled or the session limit is zero.
    pub fn validate(&self) -> Result<()> {
        if self.protocol_types.is_empty() {
            return Err(ServerError::Config(
                "protocolTypes must list at least one of stdio, http, sse".to_string(),
            ));
        }
        if self.max_sessions == 0 {
            return Err(ServerError::Config("maxSessions must be at least 1".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn compiler_config(&self) -> CompilerConfig {
        CompilerConfig {
            selected_tools: self.selected_tools.clone(),
            collision_policy: self.collision_policy,
        }
    }

    #[must_use]
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    #[must_use]
    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }

    /// Pick the transport to run: the requested one if enabled, else the first enabled one.
    ///
    /// # Errors
    ///
    /// Returns an error if `requested` is not listed in `protocolTypes`.
    pub fn select_transport(&self, requested: Option<Protocol>) -> Result<Protocol> {
        match requested {
            Some(p) if self.protocol_types.contains(&p) => Ok(p),
            Some(p) => Err(ServerError::Config(format!(
                "transport '{p}' is not enabled (protocolTypes: {})",
                self.protocol_list()
            ))),
            None => self
                .protocol_types
                .first()
                .copied()
                .ok_or_else(|| ServerError::Config("no transport enabled".to_string())),
        }
    }

    #[must_use]
    pub fn protocol_list(&self) -> String {
        self.protocol_types
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    #[must_use]
    pub fn server_name(&self, doc: &ApiDocument) -> String {
        self.mcp_name
            .clone()
            .or_else(|| doc.title().map(str::to_string))
            .unwrap_or_else(|| DEFAULT_SERVER_NAME.to_string())
    }

    #[must_use]
    pub fn server_description(&self, doc: &ApiDocument) -> String {
        self.description
            .clone()
            .or_else(|| doc.description().map(str::to_string))
            .unwrap_or_else(|| DEFAULT_SERVER_DESCRIPTION.to_string())
    }

    /// Config override first, then the document's first server.
    #[must_use]
    pub fn upstream_base_url(&self, doc: &ApiDocument) -> String {
        self.base_url
            .as_deref()
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| doc.base_url())
    }
}

fn default_protocol_types() -> Vec<Protocol> {
    vec![Protocol::Stdio]
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_upstream_timeout_secs() -> u64 {
    DEFAULT_UPSTREAM_TIMEOUT.as_secs()
}

fn default_session_idle_timeout_secs() -> u64 {
    DEFAULT_SESSION_IDLE_TIMEOUT_SECS
}

fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}

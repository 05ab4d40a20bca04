use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings that shape how an `OpenAPI` document is compiled into tools.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompilerConfig {
    /// Exposed tool names to keep. `None` keeps every tool.
    #[serde(default, alias = "selected_tools")]
    pub selected_tools: Option<Vec<String>>,

    /// What to do when two operations synthesize the same tool name.
    #[serde(default, alias = "collision_policy")]
    pub collision_policy: CollisionPolicy,
}

/// Duplicate tool name handling.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Rename later occurrences to `<name>_1`, `<name>_2`, ... and log a warning.
    #[default]
    Suffix,
    /// Fail compilation.
    Error,
}

/// Settings for the LLM-backed description enhancer.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnhancementConfig {
    /// Turn enhancement on. Even when enabled, a missing API key silently disables it.
    #[serde(default)]
    pub enabled: bool,

    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_api_base", alias = "api_base")]
    pub api_base: String,

    /// Explicit API key. Prefer `apiKeyEnv` so secrets stay out of config files.
    #[serde(default, alias = "api_key")]
    pub api_key: Option<String>,

    /// Environment variable consulted when `apiKey` is not set.
    #[serde(default = "default_api_key_env", alias = "api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-operation bound on one enhancement call, in seconds.
    #[serde(default = "default_timeout_secs", alias = "timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base: default_api_base(),
            api_key: None,
            api_key_env: default_api_key_env(),
            model: default_model(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EnhancementConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The API key to use: explicit value first, then the configured environment variable.
    #[must_use]
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout_secs() -> u64 {
    20
}

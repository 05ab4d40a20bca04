//! Optional LLM-backed tool description enhancement.
//!
//! Enhancement is advisory. The compiled schema stays authoritative: an enhancer may replace the
//! tool description and fill in property descriptions, but it can never add, remove or retype
//! properties, and it never touches `required`.

use crate::config::EnhancementConfig;
use crate::error::{OpenApiToolsError, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::LazyLock;

/// Everything an enhancer gets to look at for one operation.
#[derive(Debug, Clone)]
pub struct EnhancementRequest {
    pub operation_id: String,
    pub method: String,
    pub path: String,
    pub description: String,
    pub input_schema: Value,
    pub operation: Value,
}

/// Suggested descriptions for one tool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enhancement {
    pub description: Option<String>,
    /// `(property name as the enhancer spelled it, description)`, in the enhancer's order.
    pub property_descriptions: Vec<(String, String)>,
}

#[async_trait]
pub trait Enhancer: Send + Sync {
    /// # Errors
    ///
    /// Any error makes the compiler keep the unenhanced tool.
    async fn enhance(&self, request: &EnhancementRequest) -> Result<Enhancement>;
}

/// Merge an enhancement into a tool's description and `inputSchema`.
///
/// A property description is adopted on an exact name match, or when exactly one existing
/// property matches after snake/camel case normalization. Ambiguous and unknown names are
/// dropped.
pub fn apply_enhancement(description: &mut String, input_schema: &mut Value, enhancement: Enhancement) {
    if let Some(d) = enhancement.description.filter(|d| !d.trim().is_empty()) {
        *description = d;
    }

    let Some(properties) = input_schema
        .get_mut("properties")
        .and_then(Value::as_object_mut)
    else {
        return;
    };

    for (suggested, text) in enhancement.property_descriptions {
        let target = if properties.contains_key(&suggested) {
            Some(suggested)
        } else {
            let mut candidates = properties
                .keys()
                .filter(|existing| names_match(existing, &suggested));
            match (candidates.next(), candidates.next()) {
                (Some(only), None) => Some(only.clone()),
                _ => None,
            }
        };

        if let Some(name) = target
            && let Some(schema) = properties.get_mut(&name).and_then(Value::as_object_mut)
        {
            schema.insert("description".to_string(), Value::String(text));
        }
    }
}

fn names_match(existing: &str, suggested: &str) -> bool {
    let squash = |s: &str| s.to_lowercase().replace('_', "");
    squash(existing) == squash(suggested)
        || snake_to_camel(suggested) == existing
        || camel_to_snake(existing) == suggested
}

fn snake_to_camel(s: &str) -> String {
    let mut parts = s.split('_');
    let mut out = parts.next().unwrap_or_default().to_string();
    for part in parts {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(&chars.as_str().to_lowercase());
        }
    }
    out
}

static CAMEL_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.)([A-Z][a-z]+)").expect("valid camel word regex"));
static CAMEL_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z0-9])([A-Z])").expect("valid camel boundary regex"));

fn camel_to_snake(s: &str) -> String {
    let first = CAMEL_WORD.replace_all(s, "${1}_${2}");
    CAMEL_BOUNDARY
        .replace_all(&first, "${1}_${2}")
        .to_lowercase()
}

const SYSTEM_PROMPT: &str = "You are an expert at creating clear, useful API tool definitions. Always respond with valid JSON.";

/// Enhancer that asks an OpenAI-compatible `/chat/completions` endpoint for better descriptions.
#[derive(Debug, Clone)]
pub struct ChatCompletionsEnhancer {
    client: Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

impl ChatCompletionsEnhancer {
    #[must_use]
    pub fn new(client: Client, config: &EnhancementConfig) -> Self {
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.resolve_api_key(),
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }

    fn prompt(request: &EnhancementRequest) -> String {
        let schema = serde_json::to_string_pretty(&request.input_schema)
            .unwrap_or_else(|_| request.input_schema.to_string());
        let operation = serde_json::to_string_pretty(&request.operation)
            .unwrap_or_else(|_| request.operation.to_string());
        format!(
            "You are an expert at creating MCP (Model Context Protocol) tool definitions from OpenAPI specifications.\n\n\
             Given this API operation:\n\
             - Operation ID: {}\n\
             - Path: {} {}\n\
             - Description: {}\n\
             - Parameters Schema: {schema}\n\
             - Full Operation: {operation}\n\n\
             Improve the tool description (what it does and when to use it) and write a helpful \
             description for every parameter. Keep parameter names exactly as given.\n\n\
             Respond with a JSON object of the form:\n\
             {{\"description\": \"...\", \"parameters\": {{\"type\": \"object\", \"properties\": \
             {{\"param_name\": {{\"description\": \"...\"}}}}}}}}",
            request.operation_id,
            request.method.to_uppercase(),
            request.path,
            request.description,
        )
    }
}

#[async_trait]
impl Enhancer for ChatCompletionsEnhancer {
    async fn enhance(&self, request: &EnhancementRequest) -> Result<Enhancement> {
        let Some(api_key) = &self.api_key else {
            return Err(OpenApiToolsError::EnhancementUnavailable(
                "no API key configured".to_string(),
            ));
        };

        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": Self::prompt(request)},
            ],
        });

        let unavailable = |msg: String| OpenApiToolsError::EnhancementUnavailable(msg);
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| unavailable(e.without_url().to_string()))?;
        if !resp.status().is_success() {
            return Err(unavailable(format!(
                "completion endpoint returned {}",
                resp.status()
            )));
        }
        let completion: Value = resp
            .json()
            .await
            .map_err(|e| unavailable(e.without_url().to_string()))?;

        let content = completion
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| unavailable("completion has no message content".to_string()))?;

        parse_completion_content(content)
    }
}

/// Parse the model's reply, tolerating a Markdown code fence around the JSON.
///
/// # Errors
///
/// Returns an error if the reply is not JSON or lacks `description` / `parameters`.
pub fn parse_completion_content(content: &str) -> Result<Enhancement> {
    let mut text = content.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }

    let parsed: Value = serde_json::from_str(text.trim())?;
    let (Some(description), Some(parameters)) = (parsed.get("description"), parsed.get("parameters"))
    else {
        return Err(OpenApiToolsError::EnhancementUnavailable(
            "reply is missing 'description' or 'parameters'".to_string(),
        ));
    };

    let property_descriptions = parameters
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .filter_map(|(name, def)| {
                    def.get("description")
                        .and_then(Value::as_str)
                        .map(|d| (name.clone(), d.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Enhancement {
        description: description.as_str().map(str::to_string),
        property_descriptions,
    })
}

//! Loading and navigating `OpenAPI`-style documents.
//!
//! Documents are kept as untyped JSON so that loosely written specs (missing `info`, unknown
//! keywords, vendor extensions) still compile. Key order is preserved, which keeps tool order and
//! schema property order stable across runs.

use crate::error::{OpenApiToolsError, Result};
use reqwest::{Client, Method};
use serde_json::Value;
use toolsmith_http_tools::runtime::redact_url;
use toolsmith_http_tools::semantics::operation_method;
use url::Url;

/// Upstream base URL used when the document declares no servers.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone)]
pub struct ApiDocument {
    root: Value,
    location: String,
}

/// One `(path, method, operation)` triple of a document.
#[derive(Debug, Clone, Copy)]
pub struct ApiOperation<'a> {
    pub path: &'a str,
    pub method_key: &'a str,
    pub operation: &'a Value,
    pub path_item: &'a Value,
}

impl ApiOperation<'_> {
    #[must_use]
    pub fn method(&self) -> Method {
        operation_method(self.method_key).unwrap_or(Method::GET)
    }

    #[must_use]
    pub fn operation_id(&self) -> Option<&str> {
        self.operation.get("operationId").and_then(Value::as_str)
    }

    /// `"GET /users/{id}"`, used in logs and error messages.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.method_key.to_uppercase(), self.path)
    }
}

impl ApiDocument {
    /// Parse a document from text. JSON is tried first, then YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is neither JSON nor YAML, or if the top level is not an
    /// object.
    pub fn parse(content: &str, location: impl Into<String>) -> Result<Self> {
        let location = location.into();
        let root: Value = match serde_json::from_str(content) {
            Ok(v) => v,
            Err(json_err) => serde_yaml::from_str(content).map_err(|yaml_err| {
                OpenApiToolsError::SpecParse {
                    location: location.clone(),
                    message: format!("not valid JSON ({json_err}) or YAML ({yaml_err})"),
                }
            })?,
        };

        if !root.is_object() {
            return Err(OpenApiToolsError::SpecParse {
                location,
                message: "top-level value must be an object".to_string(),
            });
        }

        Ok(Self { root, location })
    }

    /// Wrap an already parsed document.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not an object.
    pub fn from_value(root: Value) -> Result<Self> {
        if !root.is_object() {
            return Err(OpenApiToolsError::SpecParse {
                location: "inline".to_string(),
                message: "top-level value must be an object".to_string(),
            });
        }
        Ok(Self {
            root,
            location: "inline".to_string(),
        })
    }

    /// Load a document from a file path or an `http(s)` URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be fetched or read, or fails to parse.
    pub async fn load(location: &str, client: &Client) -> Result<Self> {
        if location.starts_with("http://") || location.starts_with("https://") {
            tracing::info!("Fetching OpenAPI spec from {location}");
            let url = Url::parse(location).map_err(|e| {
                OpenApiToolsError::OpenApi(format!("Invalid OpenAPI spec URL '{location}': {e}"))
            })?;
            let shown = redact_url(&url);
            let fetch_err = |message: String| OpenApiToolsError::SpecFetch {
                url: shown.clone(),
                message,
            };

            let resp = client
                .get(url)
                .send()
                .await
                .map_err(|e| fetch_err(e.without_url().to_string()))?;
            if !resp.status().is_success() {
                return Err(fetch_err(format!("status {}", resp.status())));
            }
            let body = resp
                .text()
                .await
                .map_err(|e| fetch_err(e.without_url().to_string()))?;
            Self::parse(&body, shown)
        } else {
            Self::load_file(location)
        }
    }

    /// Load a document from a local file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or fails to parse.
    pub fn load_file(path: &str) -> Result<Self> {
        tracing::info!("Loading OpenAPI spec from {path}");
        let content =
            std::fs::read_to_string(path).map_err(|source| OpenApiToolsError::SpecReadFile {
                path: path.to_string(),
                source,
            })?;
        Self::parse(&content, path)
    }

    #[must_use]
    pub fn root(&self) -> &Value {
        &self.root
    }

    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.root.pointer("/info/title").and_then(Value::as_str)
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.root
            .pointer("/info/description")
            .and_then(Value::as_str)
    }

    /// `servers[0].url`, or [`DEFAULT_BASE_URL`] when absent.
    ///
    /// A relative server URL is resolved against the document location when the document was
    /// fetched over HTTP.
    #[must_use]
    pub fn base_url(&self) -> String {
        let Some(server) = self
            .root
            .pointer("/servers/0/url")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
        else {
            return DEFAULT_BASE_URL.to_string();
        };

        if Url::parse(server).is_ok() {
            return server.trim_end_matches('/').to_string();
        }

        match Url::parse(&self.location).and_then(|base| base.join(server)) {
            Ok(joined) => joined.as_str().trim_end_matches('/').to_string(),
            Err(_) => server.trim_end_matches('/').to_string(),
        }
    }

    /// All operations in document order. Non-operation path item keys are skipped.
    pub fn operations(&self) -> impl Iterator<Item = ApiOperation<'_>> {
        self.root
            .get("paths")
            .and_then(Value::as_object)
            .into_iter()
            .flat_map(|paths| paths.iter())
            .filter_map(|(path, item)| item.as_object().map(|fields| (path, item, fields)))
            .flat_map(|(path, item, fields)| {
                fields.iter().filter_map(move |(key, operation)| {
                    (operation_method(key).is_some() && operation.is_object()).then_some(
                        ApiOperation {
                            path,
                            method_key: key,
                            operation,
                            path_item: item,
                        },
                    )
                })
            })
    }
}

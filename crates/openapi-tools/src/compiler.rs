//! Compile an [`ApiDocument`] into an ordered, name-unique [`ToolRegistry`].

use crate::config::{CollisionPolicy, CompilerConfig};
use crate::document::{ApiDocument, ApiOperation};
use crate::enhance::{Enhancer, EnhancementRequest, apply_enhancement};
use crate::error::{OpenApiToolsError, Result};
use crate::naming::synthesize_name;
use crate::resolver::SchemaResolver;
use crate::schema::ResolvedSchema;
use reqwest::Method;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use toolsmith_http_tools::handler::HandlerSpec;

/// Request body media types, most preferred first. Anything else falls back to the first
/// declared content type.
const PREFERRED_BODY_MEDIA_TYPES: [&str; 2] =
    ["application/json", "application/x-www-form-urlencoded"];

/// One compiled tool. Only `name`, `description` and `inputSchema` are serialized.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    #[serde(skip)]
    pub method: Method,
    #[serde(skip)]
    pub path: String,
    /// The operation's `operationId`, or the synthesized name when it has none.
    #[serde(skip)]
    pub original_operation_id: String,
    /// Properties that came from `in: path` parameters.
    #[serde(skip)]
    pub path_params: Vec<String>,
}

impl ToolDefinition {
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    #[must_use]
    pub fn handler_spec(&self) -> HandlerSpec {
        HandlerSpec::from_input_schema(
            self.name.clone(),
            self.method.clone(),
            self.path.clone(),
            &self.input_schema,
            &self.path_params,
        )
    }
}

/// Ordered list of tools with unique names.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
}

impl ToolRegistry {
    /// # Errors
    ///
    /// Returns [`OpenApiToolsError::NamingCollision`] if two tools share a name.
    pub fn new(tools: Vec<ToolDefinition>) -> Result<Self> {
        let mut seen: HashMap<&str, &ToolDefinition> = HashMap::new();
        for tool in &tools {
            if let Some(first) = seen.insert(&tool.name, tool) {
                return Err(OpenApiToolsError::NamingCollision {
                    name: tool.name.clone(),
                    first: first.label(),
                    second: tool.label(),
                });
            }
        }
        Ok(Self { tools })
    }

    #[must_use]
    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.iter()
    }
}

struct Draft {
    tool: ToolDefinition,
    operation: Value,
}

#[derive(Debug, Clone, Default)]
pub struct ToolCompiler {
    config: CompilerConfig,
}

impl ToolCompiler {
    #[must_use]
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    /// Compile every operation of `doc` into a tool.
    ///
    /// The result depends only on the document and the compiler config.
    ///
    /// # Errors
    ///
    /// Returns an error on cyclic `$ref`s, or on a name collision under
    /// [`CollisionPolicy::Error`].
    pub fn compile(&self, doc: &ApiDocument) -> Result<ToolRegistry> {
        let drafts = self.prepare(doc)?;
        ToolRegistry::new(drafts.into_iter().map(|d| d.tool).collect())
    }

    /// Like [`compile`](Self::compile), then asks `enhancer` to improve each tool's
    /// descriptions.
    ///
    /// Enhancement calls run concurrently, each bounded by `timeout`. A failed or timed-out call
    /// leaves that one tool unenhanced.
    ///
    /// # Errors
    ///
    /// Same as [`compile`](Self::compile); enhancement failures are never errors.
    pub async fn compile_with_enhancer(
        &self,
        doc: &ApiDocument,
        enhancer: &dyn Enhancer,
        timeout: Duration,
    ) -> Result<ToolRegistry> {
        let mut drafts = self.prepare(doc)?;

        let requests: Vec<EnhancementRequest> = drafts
            .iter()
            .map(|d| EnhancementRequest {
                operation_id: d.tool.original_operation_id.clone(),
                method: d.tool.method.as_str().to_lowercase(),
                path: d.tool.path.clone(),
                description: d.tool.description.clone(),
                input_schema: d.tool.input_schema.clone(),
                operation: d.operation.clone(),
            })
            .collect();

        let outcomes = futures::future::join_all(
            requests
                .iter()
                .map(|req| tokio::time::timeout(timeout, enhancer.enhance(req))),
        )
        .await;

        for (draft, outcome) in drafts.iter_mut().zip(outcomes) {
            let tool = &mut draft.tool;
            match outcome {
                Ok(Ok(enhancement)) => {
                    apply_enhancement(&mut tool.description, &mut tool.input_schema, enhancement);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Enhancement failed for tool '{}': {}", tool.name, e);
                }
                Err(_) => {
                    tracing::warn!(
                        "Enhancement for tool '{}' timed out after {}ms",
                        tool.name,
                        timeout.as_millis()
                    );
                }
            }
        }

        ToolRegistry::new(drafts.into_iter().map(|d| d.tool).collect())
    }

    /// Draft, uniquely name and select the tools of `doc`.
    fn prepare(&self, doc: &ApiDocument) -> Result<Vec<Draft>> {
        let resolver = SchemaResolver::new(doc.root());

        let mut drafts = Vec::new();
        for op in doc.operations() {
            drafts.push(draft_tool(&resolver, op)?);
        }

        self.assign_unique_names(&mut drafts)?;
        let drafts = self.select(drafts);

        tracing::info!(
            "Compiled {} tools from {}",
            drafts.len(),
            doc.location()
        );
        Ok(drafts)
    }

    fn assign_unique_names(&self, drafts: &mut [Draft]) -> Result<()> {
        let mut first_seen: HashMap<String, String> = HashMap::new();
        let mut taken: HashSet<String> = HashSet::new();

        for draft in drafts.iter_mut() {
            let tool = &mut draft.tool;
            match self.config.collision_policy {
                CollisionPolicy::Error => {
                    if let Some(first) = first_seen.get(&tool.name) {
                        return Err(OpenApiToolsError::NamingCollision {
                            name: tool.name.clone(),
                            first: first.clone(),
                            second: tool.label(),
                        });
                    }
                    first_seen.insert(tool.name.clone(), tool.label());
                }
                CollisionPolicy::Suffix => {
                    let unique = reserve_unique_tool_name(&mut taken, &tool.name);
                    if unique != tool.name {
                        tracing::warn!(
                            "Tool name '{}' for {} is already taken; exposing it as '{}'",
                            tool.name,
                            tool.label(),
                            unique
                        );
                        tool.name = unique;
                    }
                }
            }
        }
        Ok(())
    }

    fn select(&self, drafts: Vec<Draft>) -> Vec<Draft> {
        let Some(selected) = &self.config.selected_tools else {
            return drafts;
        };

        for name in selected {
            if !drafts.iter().any(|d| &d.tool.name == name) {
                tracing::warn!("Selected tool '{}' does not match any compiled tool", name);
            }
        }

        drafts
            .into_iter()
            .filter(|d| selected.contains(&d.tool.name))
            .collect()
    }
}

fn reserve_unique_tool_name(taken: &mut HashSet<String>, base: &str) -> String {
    if taken.insert(base.to_string()) {
        return base.to_string();
    }

    let mut counter = 1;
    loop {
        let candidate = format!("{base}_{counter}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

fn draft_tool(resolver: &SchemaResolver<'_>, op: ApiOperation<'_>) -> Result<Draft> {
    let label = op.label();
    let name = synthesize_name(op.path, op.method_key, op.operation);

    let mut schema = ResolvedSchema::default();
    let mut path_params = Vec::new();

    for param in merged_parameters(resolver, &op)? {
        let Some(param_name) = param.get("name").and_then(Value::as_str) else {
            tracing::warn!("Skipping unnamed parameter of {label}");
            continue;
        };

        let mut param_schema = match param.get("schema") {
            Some(s) => resolver.deref(s)?.cloned().unwrap_or_else(|| json!({})),
            None => json!({"type": "string"}),
        };
        if let (Some(map), Some(description)) = (
            param_schema.as_object_mut(),
            param.get("description").and_then(Value::as_str),
        ) && !map.contains_key("description")
        {
            map.insert("description".to_string(), Value::String(description.to_string()));
        }

        if schema.insert_property(param_name, param_schema)
            && param.get("in").and_then(Value::as_str) == Some("path")
        {
            path_params.push(param_name.to_string());
        }
        if param.get("required").and_then(Value::as_bool) == Some(true) {
            schema.require(param_name);
        }
    }

    if let Some(body_schema) = request_body_schema(resolver, op.operation)? {
        schema.merge(resolver.flatten(body_schema)?);
    }

    let description = ["description", "summary"]
        .iter()
        .find_map(|key| {
            op.operation
                .get(*key)
                .and_then(Value::as_str)
                .filter(|d| !d.trim().is_empty())
        })
        .map_or_else(|| label.clone(), str::to_string);

    let original_operation_id = op
        .operation_id()
        .map_or_else(|| name.clone(), str::to_string);

    tracing::debug!("Compiled {label} as tool '{name}'");

    Ok(Draft {
        tool: ToolDefinition {
            name,
            description,
            input_schema: schema.into_input_schema(),
            method: op.method(),
            path: op.path.to_string(),
            original_operation_id,
            path_params,
        },
        operation: op.operation.clone(),
    })
}

/// Path-item parameters followed by operation parameters, `$ref`s followed. An operation
/// parameter replaces a path-item parameter with the same `(in, name)` in place.
fn merged_parameters<'a>(
    resolver: &SchemaResolver<'a>,
    op: &ApiOperation<'a>,
) -> Result<Vec<&'a Value>> {
    let declared = [op.path_item, op.operation]
        .into_iter()
        .filter_map(|owner| owner.get("parameters").and_then(Value::as_array))
        .flatten();

    let mut merged: Vec<&'a Value> = Vec::new();
    for raw in declared {
        let Some(param) = resolver.deref(raw)? else {
            tracing::warn!("Skipping unresolvable parameter of {}", op.label());
            continue;
        };
        let key = |p: &Value| {
            (
                p.get("in").and_then(Value::as_str).map(str::to_string),
                p.get("name").and_then(Value::as_str).map(str::to_string),
            )
        };
        match merged.iter().position(|existing| key(existing) == key(param)) {
            Some(idx) => merged[idx] = param,
            None => merged.push(param),
        }
    }
    Ok(merged)
}

fn request_body_schema<'a>(
    resolver: &SchemaResolver<'a>,
    operation: &'a Value,
) -> Result<Option<&'a Value>> {
    let Some(raw) = operation.get("requestBody") else {
        return Ok(None);
    };
    let Some(content) = resolver
        .deref(raw)?
        .and_then(|body| body.get("content"))
        .and_then(Value::as_object)
    else {
        return Ok(None);
    };

    let media = PREFERRED_BODY_MEDIA_TYPES
        .iter()
        .find_map(|mt| content.get(*mt))
        .or_else(|| content.values().next());
    Ok(media.and_then(|m| m.get("schema")))
}

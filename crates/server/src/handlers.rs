//! Tool name -> handler bindings.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use toolsmith_http_tools::handler::HandlerSpec;
use toolsmith_http_tools::runtime::HandlerRuntime;
use toolsmith_openapi_tools::ToolRegistry;

/// Executes one tool.
///
/// Tool-level failures belong in the returned payload as `{"error": "..."}`. An `Err` means the
/// handler itself broke and is reported to the client as an internal error.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> anyhow::Result<Value>;
}

/// Calls the upstream API described by a [`HandlerSpec`].
pub struct RuntimeToolHandler {
    runtime: HandlerRuntime,
    spec: HandlerSpec,
}

impl RuntimeToolHandler {
    #[must_use]
    pub fn new(runtime: HandlerRuntime, spec: HandlerSpec) -> Self {
        Self { runtime, spec }
    }
}

#[async_trait]
impl ToolHandler for RuntimeToolHandler {
    async fn call(&self, arguments: Value) -> anyhow::Result<Value> {
        Ok(self.runtime.invoke(&self.spec, &arguments).await)
    }
}

#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl HandlerTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind every tool of `registry` to an upstream call through `runtime`.
    #[must_use]
    pub fn from_registry(registry: &ToolRegistry, runtime: &HandlerRuntime) -> Self {
        let mut table = Self::new();
        for tool in registry.iter() {
            table.insert(
                tool.name.clone(),
                Arc::new(RuntimeToolHandler::new(runtime.clone(), tool.handler_spec())),
            );
        }
        table
    }

    pub fn insert(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("HandlerTable").field("tools", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use toolsmith_http_tools::runtime::{UpstreamRequest, UpstreamResponse, UpstreamTransport};
    use toolsmith_openapi_tools::{ApiDocument, ToolCompiler};

    struct Fixed;

    #[async_trait]
    impl UpstreamTransport for Fixed {
        async fn send(
            &self,
            request: UpstreamRequest,
        ) -> toolsmith_http_tools::runtime::Result<UpstreamResponse> {
            Ok(UpstreamResponse {
                status: 200,
                body: json!({"url": request.url.as_str()}).to_string(),
            })
        }
    }

    #[tokio::test]
    async fn table_binds_every_compiled_tool() {
        let doc = ApiDocument::from_value(json!({
            "paths": {
                "/users/{id}": {"get": {"parameters": [
                    {"name": "id", "in": "path", "required": true, "schema": {"type": "integer"}}
                ]}},
                "/users": {"post": {}}
            }
        }))
        .unwrap();
        let registry = ToolCompiler::default().compile(&doc).unwrap();
        let runtime = HandlerRuntime::new(
            "http://api.local",
            Arc::new(Fixed),
            Duration::from_secs(1),
        );
        let table = HandlerTable::from_registry(&registry, &runtime);
        assert_eq!(table.len(), 2);
        assert!(table.get("create_user").is_some());
        assert!(table.get("nope").is_none());

        let out = table
            .get("get_users")
            .unwrap()
            .call(json!({"id": "7"}))
            .await
            .unwrap();
        assert_eq!(out, json!({"url": "http://api.local/users/7"}));

        let missing = table.get("get_users").unwrap().call(json!({})).await.unwrap();
        assert_eq!(missing, json!({"error": "Missing required parameter: id"}));
    }
}

//! The Tool Router: registry of built-in and external tools, and the single
//! dispatch point (`call_tool`) the Turn Engine calls.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use ak_domain::{McpConfig, ToolDefinition};
use ak_mcp_client::McpManager;
use parking_lot::RwLock;
use serde_json::Value;

use crate::builtin::{GetDatetime, ReadFile, TodoRead, TodoStore, TodoWrite, WriteFile};

/// Per-call context the router hands to every built-in handler.
pub struct ToolContext {
    pub session_id: String,
}

/// A tool implemented in-process (as opposed to forwarded to the external
/// tool protocol client).
#[async_trait::async_trait]
pub trait BuiltinTool: Send + Sync {
    fn spec(&self) -> ToolDefinition;
    async fn call(&self, arguments: Value, ctx: &ToolContext) -> (String, bool);
}

pub struct ToolRouter {
    builtins: HashMap<String, Arc<dyn BuiltinTool>>,
    registry: RwLock<HashMap<String, ToolDefinition>>,
    disallowed_external: Vec<String>,
    mcp_config: McpConfig,
    external: RwLock<Option<McpManager>>,
}

impl ToolRouter {
    /// Construct a router with only the built-in tools registered. External
    /// tools are discovered and added by `enter()`.
    pub fn new(workspace_root: PathBuf, mcp_config: McpConfig, disallowed_external: Vec<String>) -> Self {
        let todos = Arc::new(TodoStore::new());

        let builtins: Vec<Arc<dyn BuiltinTool>> = vec![
            Arc::new(GetDatetime),
            Arc::new(ReadFile { workspace_root: workspace_root.clone() }),
            Arc::new(WriteFile { workspace_root }),
            Arc::new(TodoWrite { store: todos.clone() }),
            Arc::new(TodoRead { store: todos }),
        ];

        let mut by_name = HashMap::new();
        let mut registry = HashMap::new();
        for tool in builtins {
            let spec = tool.spec();
            registry.insert(spec.name.clone(), spec.clone());
            by_name.insert(spec.name, tool);
        }

        Self {
            builtins: by_name,
            registry: RwLock::new(registry),
            disallowed_external,
            mcp_config,
            external: RwLock::new(None),
        }
    }

    /// Open the external tool protocol client (if any servers are
    /// configured), discover its tools, filter out disallowed names, and
    /// register the remainder. Between `enter` and `exit` the registry is
    /// frozen except for this one late-registration pass.
    pub async fn enter(&self) {
        if self.mcp_config.servers.is_empty() {
            return;
        }

        let manager = McpManager::from_config(&self.mcp_config).await;
        let mut registry = self.registry.write();
        for (_server_id, tool) in manager.list_tools() {
            if self.disallowed_external.iter().any(|n| n == &tool.name) {
                tracing::info!(tool = %tool.name, "skipping disallowed external tool");
                continue;
            }
            registry.insert(
                tool.name.clone(),
                ToolDefinition {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.input_schema.clone(),
                },
            );
        }
        drop(registry);
        *self.external.write() = Some(manager);
    }

    /// Close the external tool protocol client.
    pub async fn exit(&self) {
        if let Some(manager) = self.external.write().take() {
            manager.shutdown().await;
        }
    }

    /// Tool definitions in the shape the LLM provider contract expects.
    pub fn tool_specs_for_llm(&self) -> Vec<ToolDefinition> {
        self.registry.read().values().cloned().collect()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registry.read().contains_key(name)
    }

    /// Dispatch a tool call. Malformed argument JSON is treated as an empty
    /// object rather than a dispatch failure — the engine classifies the
    /// call as an argument error separately. Tool errors are never thrown
    /// out of here; they come back as `(error_text, false)`.
    pub async fn call_tool(&self, name: &str, arguments_json: &str, ctx: &ToolContext) -> (String, bool) {
        let arguments: Value = serde_json::from_str(arguments_json).unwrap_or_else(|_| serde_json::json!({}));

        if let Some(tool) = self.builtins.get(name) {
            return tool.call(arguments, ctx).await;
        }

        if !self.is_registered(name) {
            return (format!("tool not found: {name}"), false);
        }

        let external = self.external.read();
        match external.as_ref() {
            Some(manager) => match manager.call_tool_by_name(name, arguments).await {
                Ok(result) => (ak_mcp_client::content_to_string(&result.content), !result.is_error),
                Err(e) => (format!("tool error: {e}"), false),
            },
            None => (format!("external tool client not initialized for '{name}'"), false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> ToolRouter {
        let dir = tempfile::tempdir().unwrap();
        ToolRouter::new(dir.into_path(), McpConfig::default(), Vec::new())
    }

    #[tokio::test]
    async fn builtins_are_registered_before_enter() {
        let r = router();
        assert!(r.is_registered("get_datetime"));
        assert!(r.is_registered("read_file"));
        assert!(r.is_registered("write_file"));
        assert!(r.is_registered("todo_write"));
        assert!(r.is_registered("todo_read"));
    }

    #[tokio::test]
    async fn call_tool_dispatches_builtin() {
        let r = router();
        let ctx = ToolContext { session_id: "s1".into() };
        let (text, ok) = r.call_tool("get_datetime", "{}", &ctx).await;
        assert!(ok);
        assert!(text.contains("UTC"));
    }

    #[tokio::test]
    async fn call_tool_returns_not_found_for_unknown_name() {
        let r = router();
        let ctx = ToolContext { session_id: "s1".into() };
        let (text, ok) = r.call_tool("does_not_exist", "{}", &ctx).await;
        assert!(!ok);
        assert!(text.contains("not found"));
    }

    #[tokio::test]
    async fn call_tool_treats_malformed_json_as_empty_object() {
        let r = router();
        let ctx = ToolContext { session_id: "s1".into() };
        // get_datetime ignores its arguments entirely, so malformed JSON
        // should still dispatch successfully rather than fail the call.
        let (_, ok) = r.call_tool("get_datetime", "not json", &ctx).await;
        assert!(ok);
    }

    #[tokio::test]
    async fn enter_without_configured_servers_is_a_noop() {
        let r = router();
        r.enter().await;
        assert!(r.is_registered("get_datetime"));
        r.exit().await;
    }
}

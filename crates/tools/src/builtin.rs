//! Built-in tools registered unconditionally at router construction,
//! before `enter()` runs: `get_datetime`, `read_file`/`write_file`, and
//! `todo_write`/`todo_read`.

use std::collections::HashMap;
use std::path::PathBuf;

use ak_domain::ToolDefinition;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::validate_path;
use crate::router::{BuiltinTool, ToolContext};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// get_datetime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct GetDatetime;

#[async_trait::async_trait]
impl BuiltinTool for GetDatetime {
    fn spec(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_datetime".into(),
            description: "Return the current UTC date and time.".into(),
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
        }
    }

    async fn call(&self, _arguments: Value, _ctx: &ToolContext) -> (String, bool) {
        (Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(), true)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// read_file / write_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
struct ReadFileArgs {
    path: String,
}

pub struct ReadFile {
    pub workspace_root: PathBuf,
}

#[async_trait::async_trait]
impl BuiltinTool for ReadFile {
    fn spec(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".into(),
            description: "Read a UTF-8 text file relative to the workspace root.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"],
            }),
        }
    }

    async fn call(&self, arguments: Value, _ctx: &ToolContext) -> (String, bool) {
        let args: ReadFileArgs = match serde_json::from_value(arguments) {
            Ok(a) => a,
            Err(e) => return (format!("invalid arguments: {e}"), false),
        };
        let resolved = match validate_path(&self.workspace_root, &args.path) {
            Ok(p) => p,
            Err(e) => return (e, false),
        };
        match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => (content, true),
            Err(e) => (format!("failed to read '{}': {e}", args.path), false),
        }
    }
}

#[derive(Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

pub struct WriteFile {
    pub workspace_root: PathBuf,
}

#[async_trait::async_trait]
impl BuiltinTool for WriteFile {
    fn spec(&self) -> ToolDefinition {
        ToolDefinition {
            name: "write_file".into(),
            description: "Write a UTF-8 text file relative to the workspace root, creating parent directories as needed.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" },
                },
                "required": ["path", "content"],
            }),
        }
    }

    async fn call(&self, arguments: Value, _ctx: &ToolContext) -> (String, bool) {
        let args: WriteFileArgs = match serde_json::from_value(arguments) {
            Ok(a) => a,
            Err(e) => return (format!("invalid arguments: {e}"), false),
        };

        // validate_path requires the workspace root to exist but not the
        // target file itself, so a brand-new file resolves cleanly.
        let resolved = match validate_path(&self.workspace_root, &args.path) {
            Ok(p) => p,
            Err(e) => return (e, false),
        };

        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return (format!("failed to create parent directories for '{}': {e}", args.path), false);
            }
        }

        match tokio::fs::write(&resolved, &args.content).await {
            Ok(()) => (format!("wrote {} bytes to '{}'", args.content.len(), args.path), true),
            Err(e) => (format!("failed to write '{}': {e}", args.path), false),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// todo_write / todo_read
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

/// One ordered plan list per session. Each `todo_write` call replaces the
/// entire list for its session — there is no incremental merge.
#[derive(Default)]
pub struct TodoStore {
    by_session: RwLock<HashMap<String, Vec<TodoItem>>>,
}

impl TodoStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self, session_id: &str, todos: Vec<TodoItem>) {
        self.by_session.write().insert(session_id.to_string(), todos);
    }

    fn read(&self, session_id: &str) -> Vec<TodoItem> {
        self.by_session.read().get(session_id).cloned().unwrap_or_default()
    }
}

fn format_todos(todos: &[TodoItem]) -> String {
    if todos.is_empty() {
        return "(no todos)".to_string();
    }
    todos
        .iter()
        .map(|t| {
            let marker = match t.status {
                TodoStatus::Pending => "[ ]",
                TodoStatus::InProgress => "[~]",
                TodoStatus::Completed => "[x]",
            };
            format!("{marker} {} ({})", t.content, t.id)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Deserialize)]
struct TodoWriteArgs {
    todos: Vec<TodoItem>,
}

pub struct TodoWrite {
    pub store: std::sync::Arc<TodoStore>,
}

#[async_trait::async_trait]
impl BuiltinTool for TodoWrite {
    fn spec(&self) -> ToolDefinition {
        ToolDefinition {
            name: "todo_write".into(),
            description: "Replace the session's plan with the given ordered list of todos.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "todos": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": { "type": "string" },
                                "content": { "type": "string" },
                                "status": { "type": "string", "enum": ["pending", "in_progress", "completed"] },
                            },
                            "required": ["id", "content", "status"],
                        },
                    },
                },
                "required": ["todos"],
            }),
        }
    }

    async fn call(&self, arguments: Value, ctx: &ToolContext) -> (String, bool) {
        let args: TodoWriteArgs = match serde_json::from_value(arguments) {
            Ok(a) => a,
            Err(e) => return (format!("invalid arguments: {e}"), false),
        };
        let formatted = format_todos(&args.todos);
        self.store.write(&ctx.session_id, args.todos);
        (formatted, true)
    }
}

pub struct TodoRead {
    pub store: std::sync::Arc<TodoStore>,
}

#[async_trait::async_trait]
impl BuiltinTool for TodoRead {
    fn spec(&self) -> ToolDefinition {
        ToolDefinition {
            name: "todo_read".into(),
            description: "Return the session's current plan.".into(),
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
        }
    }

    async fn call(&self, _arguments: Value, ctx: &ToolContext) -> (String, bool) {
        (format_todos(&self.store.read(&ctx.session_id)), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(session_id: &str) -> ToolContext {
        ToolContext { session_id: session_id.to_string() }
    }

    #[tokio::test]
    async fn get_datetime_returns_utc_string() {
        let (text, ok) = GetDatetime.call(Value::Null, &ctx("s1")).await;
        assert!(ok);
        assert!(text.contains("UTC"));
    }

    #[tokio::test]
    async fn write_then_read_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let writer = WriteFile { workspace_root: dir.path().to_path_buf() };
        let reader = ReadFile { workspace_root: dir.path().to_path_buf() };

        let (_, ok) = writer
            .call(serde_json::json!({"path": "notes/a.txt", "content": "hello"}), &ctx("s1"))
            .await;
        assert!(ok);

        let (content, ok) = reader.call(serde_json::json!({"path": "notes/a.txt"}), &ctx("s1")).await;
        assert!(ok);
        assert_eq!(content, "hello");
    }

    #[tokio::test]
    async fn read_file_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let reader = ReadFile { workspace_root: dir.path().to_path_buf() };
        let (_, ok) = reader.call(serde_json::json!({"path": "../../etc/passwd"}), &ctx("s1")).await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn todo_write_then_read_is_scoped_per_session() {
        let store = std::sync::Arc::new(TodoStore::new());
        let writer = TodoWrite { store: store.clone() };
        let reader = TodoRead { store: store.clone() };

        writer
            .call(
                serde_json::json!({"todos": [{"id": "1", "content": "write tests", "status": "in_progress"}]}),
                &ctx("session-a"),
            )
            .await;

        let (text_a, _) = reader.call(Value::Null, &ctx("session-a")).await;
        assert!(text_a.contains("write tests"));

        let (text_b, _) = reader.call(Value::Null, &ctx("session-b")).await;
        assert_eq!(text_b, "(no todos)");
    }

    #[tokio::test]
    async fn todo_write_rejects_unknown_status() {
        let writer = TodoWrite { store: std::sync::Arc::new(TodoStore::new()) };
        let (_, ok) = writer
            .call(
                serde_json::json!({"todos": [{"id": "1", "content": "x", "status": "bogus"}]}),
                &ctx("s1"),
            )
            .await;
        assert!(!ok);
    }
}

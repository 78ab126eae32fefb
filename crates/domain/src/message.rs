use serde::{Deserialize, Serialize};

/// A tool call proposed by the assistant.
///
/// `arguments` is kept as the raw JSON string the provider returned — the
/// tool router parses (or rejects) it at dispatch time, never here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Tool definition exposed to the LLM, following the "OpenAI tools"
/// convention: `{"type":"function","function":{name,description,parameters}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Render in the OpenAI "tools" array shape for a completion request.
    pub fn to_openai_tool(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// An ordered record in a conversation.
///
/// Append-only: the only mutation a compacted history performs is to
/// *replace a prefix* of the message list with a single summary message.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Message {
    pub role: Role,
    /// Null for tool-call-only assistant turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Populated on assistant turns that propose tool calls.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Populated on tool-result turns: the id of the call this answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Populated on tool-result turns: the name of the tool that ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    #[default]
    User,
    Assistant,
    Tool,
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn assistant_with_tool_calls(text: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: text,
            tool_calls,
            ..Default::default()
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// True for an assistant turn that proposed at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_has_text_content() {
        let m = Message::user("hello");
        assert_eq!(m.content.as_deref(), Some("hello"));
        assert!(m.tool_calls.is_empty());
    }

    #[test]
    fn assistant_with_tool_calls_may_have_null_content() {
        let m = Message::assistant_with_tool_calls(
            None,
            vec![ToolCall {
                id: "call_1".into(),
                name: "get_datetime".into(),
                arguments: "{}".into(),
            }],
        );
        assert!(m.content.is_none());
        assert!(m.has_tool_calls());
    }

    #[test]
    fn tool_result_carries_call_id_and_name() {
        let m = Message::tool_result("call_1", "get_datetime", "2025-01-02 10:00:00 UTC");
        assert_eq!(m.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(m.name.as_deref(), Some("get_datetime"));
        assert_eq!(m.role, Role::Tool);
    }

    #[test]
    fn tool_definition_renders_openai_shape() {
        let def = ToolDefinition {
            name: "get_datetime".into(),
            description: "Return the current time".into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        };
        let rendered = def.to_openai_tool();
        assert_eq!(rendered["type"], "function");
        assert_eq!(rendered["function"]["name"], "get_datetime");
    }

    #[test]
    fn message_round_trips_through_json() {
        let m = Message::assistant_with_tool_calls(
            Some("checking".into()),
            vec![ToolCall {
                id: "c1".into(),
                name: "exec".into(),
                arguments: "{\"cmd\":\"ls\"}".into(),
            }],
        );
        let json = serde_json::to_string(&m).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tool_calls.len(), 1);
        assert_eq!(back.content.as_deref(), Some("checking"));
    }
}

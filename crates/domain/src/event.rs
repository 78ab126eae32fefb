use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A typed record flowing from the engine to the transport. Fire-and-forget:
/// the engine never awaits acknowledgement of delivery.
///
/// `event_type` is a closed set (§3) — do not add ad-hoc variants at call
/// sites; extend this enum if a new observable moment is truly needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Event {
    pub fn new(event_type: EventType, data: Value) -> Self {
        Self {
            event_type,
            data: Some(data),
        }
    }

    pub fn bare(event_type: EventType) -> Self {
        Self {
            event_type,
            data: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Ready,
    Processing,
    AssistantChunk,
    AssistantStreamEnd,
    AssistantMessage,
    ToolCall,
    ToolStateChange,
    ToolOutput,
    ToolLog,
    ApprovalRequired,
    TurnComplete,
    Compacted,
    Error,
    Shutdown,
    LogStream,
    SystemMessage,
    Interrupted,
}

/// State carried by a `tool_state_change` event's data payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallState {
    Approved,
    Rejected,
    Abandoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_event_serializes_without_data_field() {
        let event = Event::bare(EventType::Ready);
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("data").is_none());
        assert_eq!(json["event_type"], "ready");
    }

    #[test]
    fn event_with_data_round_trips() {
        let event = Event::new(EventType::ToolOutput, serde_json::json!({"tool_call_id": "c1", "success": true}));
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type, EventType::ToolOutput);
        assert_eq!(back.data.unwrap()["tool_call_id"], "c1");
    }

    #[test]
    fn event_type_serializes_snake_case() {
        assert_eq!(serde_json::to_value(EventType::AssistantStreamEnd).unwrap(), "assistant_stream_end");
        assert_eq!(serde_json::to_value(EventType::ApprovalRequired).unwrap(), "approval_required");
    }
}

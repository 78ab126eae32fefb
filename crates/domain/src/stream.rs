use std::collections::BTreeMap;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// One incremental chunk of a streaming completion.
///
/// Tool-call fragments are keyed by the provider's per-call **index** (its
/// position in the assistant's tool_calls array), not by call id — early
/// fragments may arrive before the id itself is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// An assistant text delta.
    #[serde(rename = "text_delta")]
    TextDelta { text: String },

    /// A fragment of a tool call: any of id/name/arguments may be present.
    #[serde(rename = "tool_call_delta")]
    ToolCallDelta {
        index: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        arguments_delta: Option<String>,
    },

    /// Stream is finished; usage is present when the provider reports it.
    #[serde(rename = "done")]
    Done {
        usage: Option<Usage>,
        finish_reason: Option<String>,
    },

    /// An error occurred mid-stream.
    #[serde(rename = "error")]
    Error { message: String },
}

/// Token usage for a completion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A tool call still being assembled from streaming deltas.
#[derive(Debug, Clone, Default)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Accumulates tool-call deltas keyed by index across a stream, per §4.3's
/// "Streaming deltas with fragmented tool-call fields" design note.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    by_index: BTreeMap<usize, PendingToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, index: usize, id: Option<&str>, name: Option<&str>, arguments_delta: Option<&str>) {
        let entry = self.by_index.entry(index).or_default();
        if let Some(id) = id {
            entry.id.push_str(id);
        }
        if let Some(name) = name {
            entry.name.push_str(name);
        }
        if let Some(delta) = arguments_delta {
            entry.arguments.push_str(delta);
        }
    }

    /// Finalize into an ordered list of completed tool calls, skipping any
    /// whose name never arrived (never dispatch an unnamed tool call).
    pub fn finish(self) -> Vec<crate::message::ToolCall> {
        self.by_index
            .into_values()
            .filter(|pending| !pending.name.is_empty())
            .map(|pending| crate::message::ToolCall {
                id: pending.id,
                name: pending.name,
                arguments: pending.arguments,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_fragments_by_index_in_order() {
        let mut acc = ToolCallAccumulator::new();
        acc.apply(0, Some("call_1"), Some("get_"), Some("{\"a\""));
        acc.apply(0, None, Some("datetime"), Some(":1}"));
        acc.apply(1, Some("call_2"), Some("exec"), Some("{}"));

        let calls = acc.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "get_datetime");
        assert_eq!(calls[0].arguments, "{\"a\":1}");
        assert_eq!(calls[1].name, "exec");
    }

    #[test]
    fn out_of_order_index_arrival_is_still_sorted_on_finish() {
        let mut acc = ToolCallAccumulator::new();
        acc.apply(2, Some("c2"), Some("tool_c"), None);
        acc.apply(0, Some("c0"), Some("tool_a"), None);
        acc.apply(1, Some("c1"), Some("tool_b"), None);

        let calls = acc.finish();
        let names: Vec<_> = calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["tool_a", "tool_b", "tool_c"]);
    }

    #[test]
    fn unnamed_call_is_dropped_on_finish() {
        let mut acc = ToolCallAccumulator::new();
        acc.apply(0, Some("c0"), None, Some("{}"));
        assert!(acc.finish().is_empty());
    }

    #[test]
    fn empty_accumulator_finishes_empty() {
        let acc = ToolCallAccumulator::new();
        assert!(acc.is_empty());
        assert!(acc.finish().is_empty());
    }
}

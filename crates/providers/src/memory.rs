//! A deterministic, network-free backend used to exercise the streaming and
//! tool-call-delta accumulation path in tests without a live provider.
//!
//! Responses are scripted: construct with [`InMemoryProvider::with_script`]
//! and each call to `chat`/`chat_stream` pops the next scripted response in
//! order, looping back to the start once exhausted.

use std::sync::Mutex;

use ak_domain::capability::{LlmCapabilities, ToolSupport};
use ak_domain::error::Result;
use ak_domain::message::ToolCall;
use ak_domain::stream::{BoxStream, StreamEvent, Usage};

use crate::traits::{ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider};

/// One scripted turn: either a plain text reply or a set of tool calls.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

pub struct InMemoryProvider {
    id: String,
    script: Mutex<Vec<ScriptedTurn>>,
    cursor: Mutex<usize>,
    capabilities: LlmCapabilities,
}

impl InMemoryProvider {
    pub fn with_script(id: impl Into<String>, script: Vec<ScriptedTurn>) -> Self {
        Self {
            id: id.into(),
            script: Mutex::new(script),
            cursor: Mutex::new(0),
            capabilities: LlmCapabilities {
                supports_tools: ToolSupport::StrictJson,
                supports_streaming: true,
                supports_json_mode: true,
                supports_vision: false,
                context_window_tokens: Some(32_000),
                max_output_tokens: Some(4_096),
            },
        }
    }

    fn next_turn(&self) -> ScriptedTurn {
        let script = self.script.lock().unwrap();
        if script.is_empty() {
            return ScriptedTurn::Text(String::new());
        }
        let mut cursor = self.cursor.lock().unwrap();
        let turn = script[*cursor % script.len()].clone();
        *cursor += 1;
        turn
    }
}

#[async_trait::async_trait]
impl LlmProvider for InMemoryProvider {
    async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse> {
        let response = match self.next_turn() {
            ScriptedTurn::Text(text) => ChatResponse {
                content: text,
                tool_calls: Vec::new(),
                usage: Some(Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 }),
                model: self.id.clone(),
                finish_reason: Some("stop".into()),
            },
            ScriptedTurn::ToolCalls(calls) => ChatResponse {
                content: String::new(),
                tool_calls: calls,
                usage: Some(Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 }),
                model: self.id.clone(),
                finish_reason: Some("tool_calls".into()),
            },
        };
        Ok(response)
    }

    async fn chat_stream(&self, _req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let turn = self.next_turn();
        let events: Vec<Result<StreamEvent>> = match turn {
            ScriptedTurn::Text(text) => {
                let mut events: Vec<Result<StreamEvent>> = text
                    .split_inclusive(' ')
                    .map(|chunk| Ok(StreamEvent::TextDelta { text: chunk.to_string() }))
                    .collect();
                events.push(Ok(StreamEvent::Done {
                    usage: Some(Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 }),
                    finish_reason: Some("stop".into()),
                }));
                events
            }
            ScriptedTurn::ToolCalls(calls) => {
                let mut events = Vec::new();
                for (index, call) in calls.into_iter().enumerate() {
                    events.push(Ok(StreamEvent::ToolCallDelta {
                        index,
                        id: Some(call.id),
                        name: Some(call.name),
                        arguments_delta: None,
                    }));
                    events.push(Ok(StreamEvent::ToolCallDelta {
                        index,
                        id: None,
                        name: None,
                        arguments_delta: Some(call.arguments),
                    }));
                }
                events.push(Ok(StreamEvent::Done {
                    usage: Some(Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 }),
                    finish_reason: Some("tool_calls".into()),
                }));
                events
            }
        };
        Ok(Box::pin(futures_util_compat(events)))
    }

    async fn embeddings(&self, req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        let embeddings = req.input.iter().map(|text| vec![text.len() as f32; 4]).collect();
        Ok(EmbeddingsResponse { embeddings })
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

/// Turn a `Vec` of already-computed events into a stream. Named to make the
/// call site read like the live SSE path even though nothing is async here.
fn futures_util_compat(events: Vec<Result<StreamEvent>>) -> impl futures_core::Stream<Item = Result<StreamEvent>> {
    async_stream::stream! {
        for event in events {
            yield event;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn chat_returns_scripted_text_then_loops() {
        let provider = InMemoryProvider::with_script("mem", vec![ScriptedTurn::Text("hello".into())]);
        let first = provider.chat(ChatRequest::default()).await.unwrap();
        assert_eq!(first.content, "hello");
        let second = provider.chat(ChatRequest::default()).await.unwrap();
        assert_eq!(second.content, "hello");
    }

    #[tokio::test]
    async fn chat_stream_emits_tool_call_deltas_then_done() {
        let provider = InMemoryProvider::with_script(
            "mem",
            vec![ScriptedTurn::ToolCalls(vec![ToolCall {
                id: "c1".into(),
                name: "get_datetime".into(),
                arguments: "{}".into(),
            }])],
        );
        let mut stream = provider.chat_stream(ChatRequest::default()).await.unwrap();
        let mut acc = ak_domain::stream::ToolCallAccumulator::new();
        let mut saw_done = false;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                StreamEvent::ToolCallDelta { index, id, name, arguments_delta } => {
                    acc.apply(index, id.as_deref(), name.as_deref(), arguments_delta.as_deref());
                }
                StreamEvent::Done { .. } => saw_done = true,
                _ => {}
            }
        }
        assert!(saw_done);
        let calls = acc.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_datetime");
    }

    #[tokio::test]
    async fn chat_stream_splits_text_into_token_deltas() {
        let provider = InMemoryProvider::with_script("mem", vec![ScriptedTurn::Text("a b c".into())]);
        let mut stream = provider.chat_stream(ChatRequest::default()).await.unwrap();
        let mut joined = String::new();
        while let Some(event) = stream.next().await {
            if let StreamEvent::TextDelta { text } = event.unwrap() {
                joined.push_str(&text);
            }
        }
        assert_eq!(joined, "a b c");
    }
}

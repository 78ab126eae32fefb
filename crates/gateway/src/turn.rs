//! The Turn Engine (§4.3) — the heart of the runtime. One call runs a
//! bounded loop of LLM iterations over a session's context until the model
//! produces no tool calls, an approval pause is reached, or an error
//! terminates the turn.
//!
//! Grounded on the teacher's `runtime/turn.rs` tool loop (stream
//! consumption, concurrent tool dispatch via `join_all`, cancellation
//! checks between phases) but restructured around the engine's own
//! `Event`/`Operation` wire model instead of SSE `TurnEvent`s, and around
//! the approval-gate/pause-and-resume flow the original didn't have.

use std::collections::HashMap;
use std::sync::Arc;

use ak_domain::approval::ApprovalPolicy;
use ak_domain::error::Result;
use ak_domain::event::{Event, EventType, ToolCallState};
use ak_domain::message::{Message, ToolCall};
use ak_domain::operation::ApprovalDecision;
use ak_domain::session::PendingApproval;
use ak_domain::stream::{StreamEvent, ToolCallAccumulator, Usage};
use ak_providers::router::LlmRouter;
use ak_providers::traits::ChatRequest;
use ak_tools::router::{ToolContext, ToolRouter};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use ak_context::ContextManager;

/// The LLM role the turn engine resolves against `LlmConfig.roles`. Planner
/// and summarizer are separate roles (context compaction, future
/// decomposition work); the turn loop itself always drives the executor.
pub const TURN_ROLE: &str = "executor";

/// What a turn ended with, for the caller (the session runtime) to decide
/// what happens next.
pub enum TurnOutcome {
    /// The model produced a final answer with no tool calls.
    Done,
    /// An approval batch is pending; the turn is paused mid-flight.
    AwaitingApproval,
    /// The turn was interrupted before it could finish.
    Interrupted,
    /// A transient provider error terminated the turn early.
    Errored,
}

/// Runs one session's Turn Engine. Holds no session-identifying state of
/// its own beyond what's needed to label events and dispatch tools — the
/// actual conversation lives in the caller's [`ContextManager`].
pub struct TurnEngine {
    llm: Arc<LlmRouter>,
    tools: Arc<ToolRouter>,
    approval: Arc<ApprovalPolicy>,
    max_iterations: u32,
    session_id: String,
    events: mpsc::UnboundedSender<Event>,
    summarizer: RouterSummarizer,
}

/// Bridges [`ak_context::Summarizer`] to the "summarizer" role of the same
/// LLM router the turn loop itself streams from — §4.1's "ask the LLM to
/// produce a compact natural-language summary" call.
struct RouterSummarizer(Arc<LlmRouter>);

#[async_trait::async_trait]
impl ak_context::Summarizer for RouterSummarizer {
    async fn summarize(&self, prompt: &str) -> Result<String> {
        let req = ChatRequest { messages: vec![Message::user(prompt)], ..Default::default() };
        let resp = self.0.chat_for_role("summarizer", req).await?;
        Ok(resp.content)
    }
}

impl TurnEngine {
    pub fn new(
        llm: Arc<LlmRouter>,
        tools: Arc<ToolRouter>,
        approval: Arc<ApprovalPolicy>,
        max_iterations: u32,
        session_id: String,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        let summarizer = RouterSummarizer(llm.clone());
        Self { llm, tools, approval, max_iterations, session_id, events, summarizer }
    }

    fn emit(&self, event_type: EventType, data: Value) {
        let _ = self.events.send(Event::new(event_type, data));
    }

    fn emit_bare(&self, event_type: EventType) {
        let _ = self.events.send(Event::bare(event_type));
    }

    /// Run the bounded iteration loop (§4.3 steps 1-8), starting from
    /// whatever is already in `ctx`. The caller is responsible for having
    /// appended the triggering user message (if any) before calling this —
    /// re-entry after an approval resume calls this with nothing new
    /// appended, which is exactly how §4.3.2 step 6 re-enters the engine.
    ///
    /// `pending` is the session's approval-pause slot (§3's Session state);
    /// it lives in the caller (`AgentSessionRuntime`), not in the context
    /// manager, since it's orthogonal to the message log.
    pub async fn run(
        &self,
        ctx: &mut ContextManager,
        pending: &mut Option<PendingApproval>,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<TurnOutcome> {
        for _iteration in 0..self.max_iterations {
            if cancel.is_cancelled() {
                self.emit_bare(EventType::Interrupted);
                return Ok(TurnOutcome::Interrupted);
            }

            let messages = ctx.messages().to_vec();
            let tool_specs = self.tools.tool_specs_for_llm();

            let req = ChatRequest {
                messages,
                tools: tool_specs,
                ..Default::default()
            };

            let stream_result = tokio::select! {
                r = self.llm.chat_stream_for_role(TURN_ROLE, req) => r,
                _ = cancel.cancelled() => {
                    self.emit_bare(EventType::Interrupted);
                    return Ok(TurnOutcome::Interrupted);
                }
            };

            let mut stream = match stream_result {
                Ok(s) => s,
                Err(e) => {
                    self.emit(EventType::Error, json!({"message": e.to_string()}));
                    return Ok(TurnOutcome::Errored);
                }
            };

            let mut text_buf = String::new();
            let mut accumulator = ToolCallAccumulator::new();
            let mut usage: Option<Usage> = None;
            let mut stream_errored = false;

            loop {
                let next = tokio::select! {
                    chunk = stream.next() => chunk,
                    _ = cancel.cancelled() => {
                        self.emit_bare(EventType::Interrupted);
                        return Ok(TurnOutcome::Interrupted);
                    }
                };
                let Some(chunk) = next else { break };
                match chunk {
                    Ok(StreamEvent::TextDelta { text }) => {
                        text_buf.push_str(&text);
                        self.emit(EventType::AssistantChunk, json!({"text": text}));
                    }
                    Ok(StreamEvent::ToolCallDelta { index, id, name, arguments_delta }) => {
                        accumulator.apply(index, id.as_deref(), name.as_deref(), arguments_delta.as_deref());
                    }
                    Ok(StreamEvent::Done { usage: done_usage, .. }) => {
                        usage = done_usage;
                    }
                    Ok(StreamEvent::Error { message }) => {
                        self.emit(EventType::Error, json!({"message": message}));
                        stream_errored = true;
                        break;
                    }
                    Err(e) => {
                        self.emit(EventType::Error, json!({"message": e.to_string()}));
                        stream_errored = true;
                        break;
                    }
                }
            }

            self.emit(
                EventType::AssistantStreamEnd,
                json!({"usage": usage.as_ref().map(|u| json!({
                    "prompt_tokens": u.prompt_tokens,
                    "completion_tokens": u.completion_tokens,
                    "total_tokens": u.total_tokens,
                }))}),
            );

            if stream_errored {
                return Ok(TurnOutcome::Errored);
            }

            let tool_calls = accumulator.finish();
            let assistant_content = if text_buf.is_empty() { None } else { Some(text_buf.clone()) };
            ctx.append(Message::assistant_with_tool_calls(assistant_content, tool_calls.clone()), None);

            if tool_calls.is_empty() {
                self.emit(EventType::AssistantMessage, json!({"text": text_buf}));
                self.finish_turn(ctx).await;
                return Ok(TurnOutcome::Done);
            }

            // Separate malformed-argument calls (§4.3.1/§4.2): these skip the
            // approval policy entirely and are surfaced as errors directly,
            // per §7's Argument error rule. `ToolRouter::call_tool` itself
            // silently treats bad JSON as `{}`, so the engine must catch it
            // here or the error-surfacing semantics would be lost.
            let mut valid: Vec<(ToolCall, Value)> = Vec::new();
            for call in tool_calls {
                match serde_json::from_str::<Value>(&call.arguments) {
                    Ok(parsed) => valid.push((call, parsed)),
                    Err(e) => {
                        let error_text = format!("argument error: {e}");
                        self.emit(EventType::ToolOutput, json!({
                            "tool_call_id": call.id,
                            "name": call.name,
                            "content": error_text,
                            "success": false,
                        }));
                        ctx.append(Message::tool_result(&call.id, &call.name, &error_text), None);
                    }
                }
            }

            if valid.is_empty() {
                // Every call this iteration was malformed; loop back so the
                // model sees the errors on its next turn.
                continue;
            }

            let (auto, gated) = self.approval.partition(&valid, |c| c.0.name.as_str(), |c| &c.1);
            let auto: Vec<(ToolCall, Value)> = auto.into_iter().cloned().collect();
            let gated: Vec<(ToolCall, Value)> = gated.into_iter().cloned().collect();

            if !gated.is_empty() {
                let batch: Vec<Value> = gated
                    .iter()
                    .map(|(call, args)| json!({"tool_call_id": call.id, "name": call.name, "arguments": args}))
                    .collect();
                self.emit(EventType::ApprovalRequired, json!({"tool_calls": batch}));
                *pending = Some(PendingApproval { tool_calls: gated.into_iter().map(|(c, _)| c).collect() });
                // Note: any `auto` calls from the same iteration that arrived
                // alongside a gated batch are *not* executed this iteration —
                // §4.3 step 7 pauses the whole turn on any approval need, so
                // nothing runs until the operator answers the batch.
                return Ok(TurnOutcome::AwaitingApproval);
            }

            self.dispatch_auto_batch(ctx, auto).await;
        }

        self.emit(EventType::Error, json!({"message": format!("turn exceeded max iterations ({})", self.max_iterations)}));
        Ok(TurnOutcome::Errored)
    }

    /// §4.3 step 6: emit `tool_call` for every valid call upfront, execute
    /// them all concurrently, then append results and emit `tool_output` in
    /// the original declared order.
    async fn dispatch_auto_batch(&self, ctx: &mut ContextManager, auto: Vec<(ToolCall, Value)>) {
        for (call, args) in &auto {
            self.emit(EventType::ToolCall, json!({"tool_call_id": call.id, "name": call.name, "arguments": args}));
        }

        let tool_ctx = ToolContext { session_id: self.session_id.clone() };
        let futures: Vec<_> = auto.iter().map(|(call, _)| self.tools.call_tool(&call.name, &call.arguments, &tool_ctx)).collect();
        let results = futures_util::future::join_all(futures).await;

        for ((call, _), (content, success)) in auto.into_iter().zip(results) {
            self.emit(EventType::ToolOutput, json!({
                "tool_call_id": call.id,
                "name": call.name,
                "content": content,
                "success": success,
            }));
            ctx.append(Message::tool_result(&call.id, &call.name, &content), None);
        }
    }

    /// §4.3.2 step 3's approved-calls path, reused by resume so the
    /// execute/append/emit sequence doesn't drift between the fresh-turn
    /// and resume-after-approval code paths.
    async fn dispatch_approved(&self, ctx: &mut ContextManager, approved: Vec<ToolCall>) {
        let tool_ctx = ToolContext { session_id: self.session_id.clone() };
        let futures: Vec<_> = approved.iter().map(|call| self.tools.call_tool(&call.name, &call.arguments, &tool_ctx)).collect();
        let results = futures_util::future::join_all(futures).await;

        for (call, (content, success)) in approved.into_iter().zip(results) {
            self.emit(EventType::ToolOutput, json!({
                "tool_call_id": call.id,
                "name": call.name,
                "content": content,
                "success": success,
            }));
            ctx.append(Message::tool_result(&call.id, &call.name, &content), None);
        }
    }

    /// §4.3.2: resolve a pending approval batch against operator decisions,
    /// then re-enter [`run`] with an empty user input so the model sees the
    /// tool results and continues. Returns `Ok(None)` if there was nothing
    /// pending (a stale/duplicate EXEC_APPROVAL).
    pub async fn resume_with_approvals(
        &self,
        ctx: &mut ContextManager,
        pending: &mut Option<PendingApproval>,
        decisions: Vec<ApprovalDecision>,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<Option<TurnOutcome>> {
        let Some(batch) = pending.take() else {
            return Ok(None);
        };

        let by_id: HashMap<&str, &ApprovalDecision> = decisions.iter().map(|d| (d.tool_call_id.as_str(), d)).collect();

        let mut approved: Vec<ToolCall> = Vec::new();
        for mut call in batch.tool_calls {
            let decision = by_id.get(call.id.as_str());
            let was_approved = decision.map(|d| d.approved).unwrap_or(false);

            self.emit(EventType::ToolStateChange, json!({
                "tool_call_id": call.id,
                "state": if was_approved { ToolCallState::Approved } else { ToolCallState::Rejected },
            }));

            if was_approved {
                if let Some(d) = decision {
                    if let Some(edited) = &d.edited_script {
                        call.arguments = edited.clone();
                    }
                }
                approved.push(call);
            } else {
                let feedback = decision.and_then(|d| d.feedback.as_deref()).map(sanitize_feedback);
                let content = match feedback {
                    Some(fb) if !fb.is_empty() => format!("cancelled by user. User feedback: {fb}"),
                    _ => "cancelled by user".to_string(),
                };
                self.emit(EventType::ToolOutput, json!({
                    "tool_call_id": call.id,
                    "name": call.name,
                    "content": content,
                    "success": false,
                }));
                ctx.append(Message::tool_result(&call.id, &call.name, &content), None);
            }
        }

        self.dispatch_approved(ctx, approved).await;

        self.run(ctx, pending, cancel).await.map(Some)
    }

    /// §4.3.3 Abandon hook: a new USER_INPUT arrives while a batch is still
    /// pending. Synthesize a cancellation tool-result for every still-gated
    /// call, emit `tool_state_change{state: abandoned}` for each, and clear
    /// the pending batch — called before the new input is appended.
    pub fn abandon_pending_approval(&self, ctx: &mut ContextManager, pending: &mut Option<PendingApproval>) {
        let Some(batch) = pending.take() else { return };
        for call in batch.tool_calls {
            self.emit(EventType::ToolStateChange, json!({
                "tool_call_id": call.id,
                "state": ToolCallState::Abandoned,
            }));
            let content = "task abandoned — user continued conversation";
            self.emit(EventType::ToolOutput, json!({
                "tool_call_id": call.id,
                "name": call.name,
                "content": content,
                "success": false,
            }));
            ctx.append(Message::tool_result(&call.id, &call.name, content), None);
        }
    }

    /// Post-loop housekeeping on a non-paused completion (§4.3 tail): run
    /// compaction, report if it changed anything, then signal turn_complete.
    /// A failed summarizer call leaves history unchanged (§4.1) — that's
    /// surfaced as its own `error` event by `ContextManager::compact`'s
    /// caller contract, so this only reports a size change, never a failure.
    async fn finish_turn(&self, ctx: &mut ContextManager) {
        let before = ctx.token_estimate();
        match ctx.compact(&self.summarizer).await {
            Ok(outcome) if outcome.compacted => {
                self.emit(EventType::Compacted, json!({"old_tokens": before, "new_tokens": ctx.token_estimate()}));
            }
            Ok(_) => {}
            Err(e) => self.emit(EventType::Error, json!({"message": e.to_string()})),
        }
        self.emit_bare(EventType::TurnComplete);
    }

    /// The operator's explicit COMPACT operation (§4.4) — bypasses the
    /// threshold check `finish_turn` applies after every turn.
    pub async fn force_compact(&self, ctx: &mut ContextManager) -> Result<()> {
        let before = ctx.token_estimate();
        let outcome = ctx.force_compact(&self.summarizer).await?;
        if outcome.compacted {
            self.emit(EventType::Compacted, json!({"old_tokens": before, "new_tokens": ctx.token_estimate()}));
        }
        Ok(())
    }
}

/// §4.3.2 step 4: strip control characters from operator-supplied rejection
/// feedback before it's woven into a tool-result message the model will
/// read, keeping newlines/tabs since multi-line feedback is legitimate.
fn sanitize_feedback(text: &str) -> String {
    text.chars().filter(|c| !c.is_control() || *c == '\n' || *c == '\t').collect()
}

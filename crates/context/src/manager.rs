use std::collections::HashSet;

use ak_domain::{Error, Message, Result, Role};

/// Anything that can turn a block of transcript text into a short natural
/// language summary. The gateway implements this over whichever LLM
/// provider is configured for the `summarizer` role; tests implement it
/// with a canned response.
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    /// `false` when the token estimate was already under threshold, or the
    /// summarizer call failed — in both cases the message log is untouched.
    pub compacted: bool,
    pub summary: Option<String>,
    pub messages_dropped: usize,
}

/// Append-only message log for one session's conversation with the model.
pub struct ContextManager {
    messages: Vec<Message>,
    token_estimate: u32,
    max_context: u32,
    compact_fraction: f64,
    untouched_tail: usize,
}

impl ContextManager {
    pub fn new(max_context: u32, compact_fraction: f64, untouched_tail: usize) -> Self {
        Self {
            messages: Vec::new(),
            token_estimate: 0,
            max_context,
            compact_fraction,
            untouched_tail,
        }
    }

    pub fn from_config(config: &ak_domain::config::ContextConfig) -> Self {
        Self::new(config.max_context, config.compact_fraction, config.untouched_tail)
    }

    /// Deterministic fallback token estimate: characters / 4, rounded up.
    /// Used whenever the caller doesn't have a provider-native count.
    pub fn estimate_tokens(text: &str) -> u32 {
        ((text.chars().count() + 3) / 4) as u32
    }

    fn message_tokens(msg: &Message) -> u32 {
        let mut total = 0u32;
        if let Some(content) = &msg.content {
            total += Self::estimate_tokens(content);
        }
        for call in &msg.tool_calls {
            total += Self::estimate_tokens(&call.name) + Self::estimate_tokens(&call.arguments);
        }
        total
    }

    /// Append a message, updating the running token estimate. `token_count`
    /// overrides the fallback character-based estimate when the caller has
    /// a provider-native count available.
    pub fn append(&mut self, msg: Message, token_count: Option<u32>) {
        self.token_estimate += token_count.unwrap_or_else(|| Self::message_tokens(&msg));
        self.messages.push(msg);
    }

    /// The ordered message list, in the shape the LLM client sends over the wire.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn token_estimate(&self) -> u32 {
        self.token_estimate
    }

    fn compact_threshold(&self) -> f64 {
        self.max_context as f64 * self.compact_fraction
    }

    /// Largest index `i` such that truncating everything before `i` never
    /// splits an assistant tool-call message from one of its tool results.
    /// Starts at `len - untouched_tail` and walks left until the boundary
    /// is safe, per the "tool_use/tool_result pairs are never split" rule.
    fn safe_split_point(&self) -> usize {
        let len = self.messages.len();
        let mut split = len.saturating_sub(self.untouched_tail);

        loop {
            let head_call_ids: HashSet<&str> = self.messages[..split]
                .iter()
                .flat_map(|m| m.tool_calls.iter().map(|tc| tc.id.as_str()))
                .collect();

            let tail_references_head = self.messages[split..].iter().any(|m| {
                m.role == Role::Tool
                    && m.tool_call_id
                        .as_deref()
                        .map(|id| head_call_ids.contains(id))
                        .unwrap_or(false)
            });

            if !tail_references_head || split == 0 {
                return split;
            }
            split -= 1;
        }
    }

    fn build_summary_prompt(head: &[Message]) -> String {
        let mut conversation = String::new();
        for msg in head {
            let role_label = match msg.role {
                Role::System => "System",
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool",
            };
            conversation.push_str(role_label);
            conversation.push_str(": ");
            if let Some(content) = &msg.content {
                conversation.push_str(content);
            }
            for call in &msg.tool_calls {
                conversation.push_str(&format!(" [calls {}({})]", call.name, call.arguments));
            }
            conversation.push('\n');
        }

        format!(
            "You are a conversation summarizer. Summarize the following conversation \
             history into a concise summary that preserves:\n\
             1. The current goal or plan being worked on\n\
             2. Key decisions made\n\
             3. Open questions or threads\n\
             4. Important facts learned about the user or context\n\
             5. Tool state (running processes, active sessions, pending work)\n\n\
             Be concise but preserve all actionable context. Write in present tense.\n\
             Omit greetings and pleasantries. Focus on substance.\n\n\
             CONVERSATION:\n{conversation}"
        )
    }

    /// If the token estimate is already at or under threshold, this is a
    /// no-op. Otherwise: summarize everything before the safe split point
    /// and replace it with one system message carrying that summary.
    ///
    /// On summarizer failure, history is left unchanged and the caller is
    /// responsible for emitting an `error` event — compaction is always
    /// best-effort, never required for correctness.
    pub async fn compact(&mut self, summarizer: &dyn Summarizer) -> Result<CompactionOutcome> {
        if (self.token_estimate as f64) <= self.compact_threshold() {
            return Ok(CompactionOutcome { compacted: false, summary: None, messages_dropped: 0 });
        }
        self.compact_inner(summarizer).await
    }

    /// Compact regardless of the current token estimate, for the operator's
    /// explicit COMPACT operation (§4.4) — bypasses the threshold check
    /// `compact()` applies on every turn.
    pub async fn force_compact(&mut self, summarizer: &dyn Summarizer) -> Result<CompactionOutcome> {
        self.compact_inner(summarizer).await
    }

    async fn compact_inner(&mut self, summarizer: &dyn Summarizer) -> Result<CompactionOutcome> {
        let split = self.safe_split_point();
        if split == 0 {
            return Ok(CompactionOutcome { compacted: false, summary: None, messages_dropped: 0 });
        }

        let head = &self.messages[..split];
        let prompt = Self::build_summary_prompt(head);

        let summary = match summarizer.summarize(&prompt).await {
            Ok(summary) => summary,
            Err(err) => {
                tracing::warn!(error = %err, "compaction summarizer call failed, leaving history unchanged");
                return Ok(CompactionOutcome { compacted: false, summary: None, messages_dropped: 0 });
            }
        };

        let dropped = split;
        let summary_message = Message::system(format!(
            "[compacted summary of {dropped} earlier messages]\n{summary}"
        ));

        let tail: Vec<Message> = self.messages.split_off(split);
        self.messages.clear();
        self.messages.push(summary_message);
        self.messages.extend(tail);

        self.token_estimate = self.messages.iter().map(Self::message_tokens).sum();

        tracing::info!(messages_dropped = dropped, summary_len = summary.len(), "context compacted");

        Ok(CompactionOutcome { compacted: true, summary: Some(summary), messages_dropped: dropped })
    }

    pub fn validate_not_empty(&self) -> Result<()> {
        if self.messages.is_empty() {
            return Err(Error::Validation("context has no messages".into()));
        }
        Ok(())
    }

    /// Pop messages from the tail until (and including) the most recent user
    /// message is removed (§4.3.3 Undo). No-op if no user message is found.
    /// Returns the number of messages removed.
    pub fn undo_last_user_turn(&mut self) -> usize {
        let Some(pos) = self.messages.iter().rposition(|m| m.role == Role::User) else {
            return 0;
        };
        let removed = self.messages.split_off(pos);
        self.token_estimate = self.messages.iter().map(Self::message_tokens).sum();
        removed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ak_domain::{Message, ToolCall};

    struct CannedSummarizer(&'static str);

    #[async_trait::async_trait]
    impl Summarizer for CannedSummarizer {
        async fn summarize(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingSummarizer;

    #[async_trait::async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(&self, _prompt: &str) -> Result<String> {
            Err(Error::Provider { provider: "test".into(), message: "boom".into() })
        }
    }

    #[test]
    fn token_estimate_is_chars_over_four_rounded_up() {
        assert_eq!(ContextManager::estimate_tokens("abcd"), 1);
        assert_eq!(ContextManager::estimate_tokens("abcde"), 2);
        assert_eq!(ContextManager::estimate_tokens(""), 0);
    }

    #[test]
    fn append_accumulates_token_estimate() {
        let mut ctx = ContextManager::new(1000, 0.5, 10);
        ctx.append(Message::user("hello world"), None);
        assert!(ctx.token_estimate() > 0);
        assert_eq!(ctx.messages().len(), 1);
    }

    #[tokio::test]
    async fn compact_is_noop_under_threshold() {
        let mut ctx = ContextManager::new(1_000_000, 0.1, 2);
        ctx.append(Message::user("hi"), None);
        let outcome = ctx.compact(&CannedSummarizer("summary")).await.unwrap();
        assert!(!outcome.compacted);
        assert_eq!(ctx.messages().len(), 1);
    }

    #[tokio::test]
    async fn compact_replaces_head_with_summary_and_keeps_tail() {
        let mut ctx = ContextManager::new(10, 1.0, 1);
        for i in 0..20 {
            ctx.append(Message::user(format!("message number {i} with enough text to matter")), None);
        }
        let before_len = ctx.messages().len();
        let outcome = ctx.compact(&CannedSummarizer("the summary")).await.unwrap();
        assert!(outcome.compacted);
        assert!(ctx.messages().len() < before_len);
        assert!(ctx.messages()[0].content.as_deref().unwrap().contains("the summary"));
    }

    #[tokio::test]
    async fn compact_leaves_history_unchanged_on_summarizer_failure() {
        let mut ctx = ContextManager::new(10, 1.0, 1);
        for i in 0..20 {
            ctx.append(Message::user(format!("message {i} padded out with words")), None);
        }
        let before_len = ctx.messages().len();
        let outcome = ctx.compact(&FailingSummarizer).await.unwrap();
        assert!(!outcome.compacted);
        assert_eq!(ctx.messages().len(), before_len);
    }

    #[tokio::test]
    async fn force_compact_ignores_threshold() {
        let mut ctx = ContextManager::new(1_000_000, 0.1, 1);
        for i in 0..5 {
            ctx.append(Message::user(format!("message {i}")), None);
        }
        let before_len = ctx.messages().len();
        let outcome = ctx.force_compact(&CannedSummarizer("forced summary")).await.unwrap();
        assert!(outcome.compacted);
        assert!(ctx.messages().len() < before_len);
    }

    #[test]
    fn undo_removes_last_user_message_and_everything_after() {
        let mut ctx = ContextManager::new(1000, 0.5, 10);
        ctx.append(Message::user("first"), None);
        ctx.append(Message::assistant("reply"), None);
        ctx.append(Message::user("second"), None);
        ctx.append(Message::assistant("reply 2"), None);

        let removed = ctx.undo_last_user_turn();
        assert_eq!(removed, 2);
        assert_eq!(ctx.messages().len(), 2);
        assert_eq!(ctx.messages()[1].content.as_deref(), Some("reply"));
    }

    #[test]
    fn undo_with_no_user_message_is_noop() {
        let mut ctx = ContextManager::new(1000, 0.5, 10);
        ctx.append(Message::system("system prompt"), None);
        assert_eq!(ctx.undo_last_user_turn(), 0);
        assert_eq!(ctx.messages().len(), 1);
    }

    #[test]
    fn safe_split_point_never_separates_tool_call_from_its_result() {
        let mut ctx = ContextManager::new(10, 1.0, 1);
        ctx.append(Message::user("do something"), None);
        ctx.append(
            Message::assistant_with_tool_calls(
                None,
                vec![ToolCall { id: "call_1".into(), name: "get_datetime".into(), arguments: "{}".into() }],
            ),
            None,
        );
        ctx.append(Message::tool_result("call_1", "get_datetime", "2026-07-31"), None);
        ctx.append(Message::user("thanks"), None);

        // untouched_tail of 1 would normally start the tail at the last
        // message only, which would split the tool_call/tool_result pair.
        let split = ctx.safe_split_point();
        assert!(split <= 1, "split point {split} must not separate the tool call from its result");
    }
}

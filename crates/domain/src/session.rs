use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{Message, ToolCall};

/// Status of a persisted session. Deleted rows are soft-deleted, never
/// physically removed from the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Archived,
    Deleted,
}

/// The durable storage record for a session (§3 PersistedSession).
///
/// Invariant: `version` strictly increases on every write for a given
/// `session_id` (I2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub session_id: String,
    pub user_id: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub title: String,
    pub model_name: String,
    pub status: SessionStatus,
    /// The full message log, serialized as a JSON array.
    pub messages_json: String,
    #[serde(default)]
    pub context_summary: Option<String>,
    /// Free-form metadata, serialized as a JSON object.
    #[serde(default = "default_metadata_json")]
    pub metadata_json: String,
    pub message_count: usize,
    pub last_message_preview: String,
}

fn default_metadata_json() -> String {
    "{}".to_string()
}

impl PersistedSession {
    pub fn messages(&self) -> crate::error::Result<Vec<Message>> {
        Ok(serde_json::from_str(&self.messages_json)?)
    }

    /// Build a preview-and-count pair from a message list, used when
    /// assembling a row for `mark_dirty`.
    pub fn preview_and_count(messages: &[Message]) -> (usize, String) {
        let count = messages.len();
        let preview = messages
            .last()
            .and_then(|m| m.content.as_deref())
            .map(|c| c.chars().take(100).collect::<String>())
            .unwrap_or_default();
        (count, preview)
    }
}

/// The per-user listing row (§3 SessionIndexEntry) — a lighter projection
/// of PersistedSession suitable for a session picker UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionIndexEntry {
    pub session_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub message_count: usize,
    pub last_message_preview: String,
}

impl From<&PersistedSession> for SessionIndexEntry {
    fn from(p: &PersistedSession) -> Self {
        Self {
            session_id: p.session_id.clone(),
            title: p.title.clone(),
            created_at: p.created_at,
            updated_at: p.updated_at,
            status: p.status,
            message_count: p.message_count,
            last_message_preview: p.last_message_preview.clone(),
        }
    }
}

/// A batch of tool_calls from one iteration, awaiting operator approval.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PendingApproval {
    pub tool_calls: Vec<ToolCall>,
}

impl PendingApproval {
    pub fn is_empty(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

/// Derived on each authenticated request (§3 UserContext, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    /// Hub access token obtained via OAuth.
    pub hub_token: String,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    /// Optional additional LLM provider API key supplied by the user.
    #[serde(default)]
    pub provider_api_key: Option<String>,
}

impl UserContext {
    /// §4.7: returns true when the context carries an additional provider
    /// key, used by the `require_anthropic_key`-equivalent auth guard.
    pub fn has_provider_key(&self) -> bool {
        self.provider_api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[test]
    fn preview_and_count_truncates_to_100_chars() {
        let long = "x".repeat(200);
        let messages = vec![Message {
            role: Role::Assistant,
            content: Some(long.clone()),
            ..Default::default()
        }];
        let (count, preview) = PersistedSession::preview_and_count(&messages);
        assert_eq!(count, 1);
        assert_eq!(preview.len(), 100);
    }

    #[test]
    fn preview_and_count_empty_messages() {
        let (count, preview) = PersistedSession::preview_and_count(&[]);
        assert_eq!(count, 0);
        assert_eq!(preview, "");
    }

    #[test]
    fn index_entry_projects_from_persisted_session() {
        let now = Utc::now();
        let persisted = PersistedSession {
            session_id: "s1".into(),
            user_id: "u1".into(),
            version: 3,
            created_at: now,
            updated_at: now,
            title: "Chat".into(),
            model_name: "gpt-4o".into(),
            status: SessionStatus::Active,
            messages_json: "[]".into(),
            context_summary: None,
            metadata_json: "{}".into(),
            message_count: 2,
            last_message_preview: "hi".into(),
        };
        let entry = SessionIndexEntry::from(&persisted);
        assert_eq!(entry.session_id, "s1");
        assert_eq!(entry.message_count, 2);
    }

    #[test]
    fn user_context_has_provider_key() {
        let ctx = UserContext {
            user_id: "u1".into(),
            hub_token: "tok".into(),
            username: "alice".into(),
            display_name: None,
            picture: None,
            provider_api_key: Some("sk-extra".into()),
        };
        assert!(ctx.has_provider_key());
    }
}

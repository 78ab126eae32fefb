//! `AgentSessionRuntime` (§4.5's per-session half of the Session Manager
//! wiring) — the `SessionRuntime` implementation the session loop task in
//! `ak_sessions::manager::SessionManager` drives one `Operation` at a time.
//!
//! Grounded on the teacher's `runtime/session.rs` (one struct per live
//! session, owning its own turn state and forwarding persistence writes
//! directly rather than through a back-pointer), restructured around the
//! engine's `ContextManager`/`PendingApproval`/`TurnEngine` split instead of
//! the teacher's single flat conversation buffer.

use std::sync::Arc;

use ak_context::ContextManager;
use ak_domain::error::Result;
use ak_domain::event::EventType;
use ak_domain::message::Message;
use ak_domain::operation::Operation;
use ak_domain::session::{PendingApproval, PersistedSession, SessionStatus};
use ak_domain::Event;
use ak_sessions::persistence::PersistenceEngine;
use ak_sessions::session::{SessionRuntime, SessionRuntimeFactory};
use tokio::sync::mpsc;

use crate::cancel::CancelRegistry;
use crate::turn::TurnEngine;

/// One live session's turn state. Lives for exactly as long as the session
/// loop task in `SessionManager` does.
pub struct AgentSessionRuntime {
    session_id: String,
    user_id: String,
    model_name: String,
    title: String,
    created_at: chrono::DateTime<chrono::Utc>,
    ctx: ContextManager,
    pending: Option<PendingApproval>,
    turn_engine: TurnEngine,
    cancel_registry: Arc<CancelRegistry>,
    persistence: Arc<tokio::sync::Mutex<PersistenceEngine>>,
    events: mpsc::UnboundedSender<Event>,
}

impl AgentSessionRuntime {
    fn emit_bare(&self, event_type: EventType) {
        let _ = self.events.send(Event::bare(event_type));
    }

    /// Build the durable snapshot for the current context and hand it to
    /// the persistence engine. `mark_dirty` bumps `version` and
    /// `updated_at` itself (I2); we only supply the fields it can't derive.
    async fn persist_snapshot(&self) {
        let messages = self.ctx.messages();
        let (message_count, last_message_preview) = PersistedSession::preview_and_count(messages);
        let messages_json = match serde_json::to_string(messages) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(session_id = %self.session_id, error = %e, "failed to serialize session messages, skipping dirty-mark");
                return;
            }
        };
        self.persistence.lock().await.mark_dirty(PersistedSession {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            version: 0,
            created_at: self.created_at,
            updated_at: self.created_at,
            title: self.title.clone(),
            model_name: self.model_name.clone(),
            status: SessionStatus::Active,
            messages_json,
            context_summary: None,
            metadata_json: "{}".to_string(),
            message_count,
            last_message_preview,
        });
    }

    /// Set the session title from the first user message, the way most
    /// chat UIs derive a picker label. Only fires once.
    fn maybe_set_title(&mut self, text: &str) {
        if self.title != "New session" {
            return;
        }
        self.title = text.chars().take(60).collect();
    }
}

#[async_trait::async_trait]
impl SessionRuntime for AgentSessionRuntime {
    async fn process_submission(&mut self, op: Operation) -> Result<()> {
        match op {
            Operation::UserInput { text } => {
                if self.pending.is_some() {
                    self.turn_engine.abandon_pending_approval(&mut self.ctx, &mut self.pending);
                }
                self.emit_bare(EventType::Processing);
                self.maybe_set_title(&text);
                self.ctx.append(Message::user(text), None);
                let cancel = self.cancel_registry.register(&self.session_id);
                let result = self.turn_engine.run(&mut self.ctx, &mut self.pending, &cancel).await;
                self.cancel_registry.remove(&self.session_id);
                self.persist_snapshot().await;
                result?;
            }
            Operation::ExecApproval { approvals } => {
                let cancel = self.cancel_registry.register(&self.session_id);
                let result = self
                    .turn_engine
                    .resume_with_approvals(&mut self.ctx, &mut self.pending, approvals, &cancel)
                    .await;
                self.cancel_registry.remove(&self.session_id);
                self.persist_snapshot().await;
                result?;
            }
            Operation::Interrupt => {
                // The transport layer routes Interrupt straight to the
                // CancelRegistry so it can reach a turn mid-await; this
                // arm only exists so a direct SessionManager::submit in
                // tests (or a future non-websocket transport) still does
                // something sensible for a session with no turn running.
                self.cancel_registry.cancel(&self.session_id);
            }
            Operation::Undo => {
                self.ctx.undo_last_user_turn();
                self.persist_snapshot().await;
            }
            Operation::Compact => {
                self.turn_engine.force_compact(&mut self.ctx).await?;
                self.persist_snapshot().await;
            }
            Operation::Shutdown => {
                self.persist_snapshot().await;
                self.cancel_registry.remove(&self.session_id);
                self.emit_bare(EventType::Shutdown);
            }
        }
        Ok(())
    }
}

/// Builds one `AgentSessionRuntime` per session, sharing the gateway's
/// long-lived subsystems (LLM router, tool router, approval policy,
/// persistence, cancel registry) across all sessions it creates.
pub struct AgentSessionRuntimeFactory {
    llm: Arc<ak_providers::router::LlmRouter>,
    tools: Arc<ak_tools::router::ToolRouter>,
    approval: Arc<ak_domain::approval::ApprovalPolicy>,
    max_iterations: u32,
    model_name: String,
    context_config: ak_domain::config::ContextConfig,
    persistence: Arc<tokio::sync::Mutex<PersistenceEngine>>,
    cancel_registry: Arc<CancelRegistry>,
}

impl AgentSessionRuntimeFactory {
    pub fn new(
        llm: Arc<ak_providers::router::LlmRouter>,
        tools: Arc<ak_tools::router::ToolRouter>,
        approval: Arc<ak_domain::approval::ApprovalPolicy>,
        max_iterations: u32,
        model_name: String,
        context_config: ak_domain::config::ContextConfig,
        persistence: Arc<tokio::sync::Mutex<PersistenceEngine>>,
        cancel_registry: Arc<CancelRegistry>,
    ) -> Self {
        Self { llm, tools, approval, max_iterations, model_name, context_config, persistence, cancel_registry }
    }
}

impl SessionRuntimeFactory for AgentSessionRuntimeFactory {
    fn create(&self, user_id: &str, session_id: &str, events: mpsc::UnboundedSender<Event>) -> Box<dyn SessionRuntime> {
        let turn_engine = TurnEngine::new(
            self.llm.clone(),
            self.tools.clone(),
            self.approval.clone(),
            self.max_iterations,
            session_id.to_string(),
            events.clone(),
        );
        let mut ctx = ContextManager::from_config(&self.context_config);
        ctx.append(Message::system("You are a helpful AI agent with access to tools."), None);
        Box::new(AgentSessionRuntime {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            model_name: self.model_name.clone(),
            title: "New session".to_string(),
            created_at: chrono::Utc::now(),
            ctx,
            pending: None,
            turn_engine,
            cancel_registry: self.cancel_registry.clone(),
            persistence: self.persistence.clone(),
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ak_domain::config::{ContextConfig, LlmConfig, PersistenceConfig, ProviderConfig, ProviderKind, RoleConfig};
    use std::collections::HashMap;

    fn test_factory() -> AgentSessionRuntimeFactory {
        let mut roles = HashMap::new();
        roles.insert("executor".to_string(), RoleConfig { model: "mem/default".into(), require_tools: false, require_json: false, require_streaming: false, fallbacks: Vec::new() });
        let llm_config = LlmConfig {
            providers: vec![ProviderConfig { id: "mem".into(), kind: ProviderKind::InMemory, base_url: String::new(), api_key_env: None, default_model: None }],
            roles,
            default_timeout_ms: 5000,
        };
        let llm = Arc::new(ak_providers::router::LlmRouter::from_config(&llm_config).unwrap());
        let dir = tempfile::tempdir().unwrap();
        let tools = Arc::new(ak_tools::router::ToolRouter::new(dir.into_path(), ak_domain::McpConfig::default(), Vec::new()));
        let persistence = Arc::new(tokio::sync::Mutex::new(PersistenceEngine::from_config(&PersistenceConfig::default()).unwrap()));
        AgentSessionRuntimeFactory::new(
            llm,
            tools,
            Arc::new(ak_domain::approval::ApprovalPolicy::default()),
            10,
            "mem/default".to_string(),
            ContextConfig::default(),
            persistence,
            Arc::new(CancelRegistry::new()),
        )
    }

    #[tokio::test]
    async fn user_input_runs_a_turn_and_marks_the_session_dirty() {
        let factory = test_factory();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut runtime = factory.create("user-1", "sess-1", tx);
        runtime.process_submission(Operation::UserInput { text: "hello".into() }).await.unwrap();

        let mut saw_processing = false;
        let mut saw_turn_complete = false;
        while let Ok(event) = rx.try_recv() {
            match event.event_type {
                EventType::Processing => saw_processing = true,
                EventType::TurnComplete => saw_turn_complete = true,
                _ => {}
            }
        }
        assert!(saw_processing);
        assert!(saw_turn_complete);
        assert!(factory.persistence.lock().await.get("sess-1", Some("user-1")).is_some());
    }

    #[tokio::test]
    async fn shutdown_persists_and_emits_shutdown_event() {
        let factory = test_factory();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut runtime = factory.create("user-1", "sess-2", tx);
        runtime.process_submission(Operation::Shutdown).await.unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type, EventType::Shutdown);
    }

    #[tokio::test]
    async fn interrupt_with_no_running_turn_is_a_noop() {
        let factory = test_factory();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut runtime = factory.create("user-1", "sess-3", tx);
        runtime.process_submission(Operation::Interrupt).await.unwrap();
    }
}

//! Multi-session manager (§4.5).
//!
//! Grounded on `backend/session_manager.py`'s `SessionManager`/`AgentSession`:
//! one map from session id to {submission queue, loop task}, a per-session
//! event stream handed back to the caller at creation time (the gateway
//! wires it into the transport layer), and a bounded-wait shutdown that
//! force-cancels a loop task that doesn't exit within the deadline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ak_domain::error::{Error, Result};
use ak_domain::event::Event;
use ak_domain::operation::{ApprovalDecision, Operation};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::session::SessionRuntimeFactory;

const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

struct LiveSession {
    user_id: String,
    created_at: DateTime<Utc>,
    submissions: mpsc::UnboundedSender<Operation>,
    task: JoinHandle<()>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

pub struct SessionManager {
    factory: Arc<dyn SessionRuntimeFactory>,
    sessions: parking_lot::RwLock<HashMap<String, LiveSession>>,
}

impl SessionManager {
    pub fn new(factory: Arc<dyn SessionRuntimeFactory>) -> Self {
        Self { factory, sessions: parking_lot::RwLock::new(HashMap::new()) }
    }

    /// Create a session, spawn its loop task, and return its id plus the
    /// event stream the caller should forward to its transport.
    pub fn create_session(&self, user_id: &str) -> (String, mpsc::UnboundedReceiver<Event>) {
        let session_id = uuid::Uuid::new_v4().to_string();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut runtime = self.factory.create(user_id, &session_id, event_tx.clone());

        let _ = event_tx.send(Event::bare(ak_domain::event::EventType::Ready));

        let (op_tx, mut op_rx) = mpsc::unbounded_channel::<Operation>();
        let task = tokio::spawn(async move {
            while let Some(op) = op_rx.recv().await {
                let is_shutdown = matches!(op, Operation::Shutdown);
                if let Err(e) = runtime.process_submission(op).await {
                    let _ = event_tx.send(Event::new(ak_domain::event::EventType::Error, serde_json::json!({"message": e.to_string()})));
                }
                if is_shutdown {
                    break;
                }
            }
        });

        self.sessions.write().insert(
            session_id.clone(),
            LiveSession { user_id: user_id.to_string(), created_at: Utc::now(), submissions: op_tx, task },
        );

        (session_id, event_rx)
    }

    /// Submit an operation to a session's queue. Returns `false` if the
    /// session is unknown or its loop task has already exited.
    pub fn submit(&self, session_id: &str, op: Operation) -> bool {
        let sessions = self.sessions.read();
        match sessions.get(session_id) {
            Some(session) if !session.task.is_finished() => session.submissions.send(op).is_ok(),
            _ => false,
        }
    }

    pub fn submit_user_input(&self, session_id: &str, text: impl Into<String>) -> bool {
        self.submit(session_id, Operation::UserInput { text: text.into() })
    }

    pub fn submit_approval(&self, session_id: &str, approvals: Vec<ApprovalDecision>) -> bool {
        self.submit(session_id, Operation::ExecApproval { approvals })
    }

    pub fn interrupt(&self, session_id: &str) -> bool {
        self.submit(session_id, Operation::Interrupt)
    }

    pub fn undo(&self, session_id: &str) -> bool {
        self.submit(session_id, Operation::Undo)
    }

    pub fn compact(&self, session_id: &str) -> bool {
        self.submit(session_id, Operation::Compact)
    }

    /// Send SHUTDOWN and wait up to `deadline` (default 5s) for the loop
    /// task to exit on its own; force-cancels it otherwise. Removes the
    /// session from the map either way. Returns `true` on a clean exit.
    pub async fn shutdown_session(&self, session_id: &str) -> bool {
        self.shutdown_session_with_deadline(session_id, DEFAULT_SHUTDOWN_DEADLINE).await
    }

    pub async fn shutdown_session_with_deadline(&self, session_id: &str, deadline: Duration) -> bool {
        if !self.submit(session_id, Operation::Shutdown) {
            self.sessions.write().remove(session_id);
            return false;
        }

        let task = {
            let mut sessions = self.sessions.write();
            sessions.remove(session_id).map(|s| s.task)
        };
        let Some(task) = task else { return false };

        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => false,
            Err(_) => {
                tracing::warn!(session_id, "shutdown deadline exceeded, force-cancelling loop task");
                false
            }
        }
    }

    /// Cancel the loop task immediately, without a graceful SHUTDOWN round trip.
    pub fn delete_session(&self, session_id: &str) -> bool {
        match self.sessions.write().remove(session_id) {
            Some(session) => {
                session.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn get_session_info(&self, session_id: &str) -> Option<SessionInfo> {
        let sessions = self.sessions.read();
        let session = sessions.get(session_id)?;
        Some(SessionInfo {
            session_id: session_id.to_string(),
            user_id: session.user_id.clone(),
            created_at: session.created_at,
            is_active: !session.task.is_finished(),
        })
    }

    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .read()
            .iter()
            .map(|(id, s)| SessionInfo { session_id: id.clone(), user_id: s.user_id.clone(), created_at: s.created_at, is_active: !s.task.is_finished() })
            .collect()
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.read().values().filter(|s| !s.task.is_finished()).count()
    }
}

/// `submit`'s boolean-return convention folded into an error for callers
/// that prefer `?`, e.g. the websocket transport's request handlers.
pub fn submission_result(ok: bool, session_id: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(Error::Validation(format!("session '{session_id}' is unknown or inactive")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ak_domain::operation::Operation;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoRuntime {
        events: mpsc::UnboundedSender<Event>,
        processed: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl crate::session::SessionRuntime for EchoRuntime {
        async fn process_submission(&mut self, op: Operation) -> Result<()> {
            self.processed.fetch_add(1, Ordering::SeqCst);
            if let Operation::UserInput { text } = op {
                let _ = self.events.send(Event::new(ak_domain::event::EventType::AssistantMessage, serde_json::json!({"text": text})));
            }
            Ok(())
        }
    }

    struct EchoFactory {
        processed: Arc<AtomicUsize>,
    }

    impl SessionRuntimeFactory for EchoFactory {
        fn create(&self, _user_id: &str, _session_id: &str, events: mpsc::UnboundedSender<Event>) -> Box<dyn crate::session::SessionRuntime> {
            Box::new(EchoRuntime { events, processed: self.processed.clone() })
        }
    }

    #[tokio::test]
    async fn create_session_emits_ready_then_processes_input() {
        let processed = Arc::new(AtomicUsize::new(0));
        let manager = SessionManager::new(Arc::new(EchoFactory { processed: processed.clone() }));
        let (session_id, mut events) = manager.create_session("alice");

        let ready = events.recv().await.unwrap();
        assert_eq!(ready.event_type, ak_domain::event::EventType::Ready);

        assert!(manager.submit_user_input(&session_id, "hello"));
        let echoed = events.recv().await.unwrap();
        assert_eq!(echoed.event_type, ak_domain::event::EventType::AssistantMessage);
        assert_eq!(processed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn submit_to_unknown_session_returns_false() {
        let manager = SessionManager::new(Arc::new(EchoFactory { processed: Arc::new(AtomicUsize::new(0)) }));
        assert!(!manager.submit_user_input("ghost", "hi"));
    }

    #[tokio::test]
    async fn shutdown_session_exits_cleanly_and_removes_entry() {
        let manager = SessionManager::new(Arc::new(EchoFactory { processed: Arc::new(AtomicUsize::new(0)) }));
        let (session_id, _events) = manager.create_session("alice");
        assert!(manager.shutdown_session(&session_id).await);
        assert!(manager.get_session_info(&session_id).is_none());
    }

    #[tokio::test]
    async fn delete_session_removes_active_session() {
        let manager = SessionManager::new(Arc::new(EchoFactory { processed: Arc::new(AtomicUsize::new(0)) }));
        let (session_id, _events) = manager.create_session("alice");
        assert!(manager.delete_session(&session_id));
        assert!(manager.get_session_info(&session_id).is_none());
        assert!(!manager.delete_session(&session_id));
    }

    #[tokio::test]
    async fn list_sessions_and_active_count_reflect_live_sessions() {
        let manager = SessionManager::new(Arc::new(EchoFactory { processed: Arc::new(AtomicUsize::new(0)) }));
        let (id1, _e1) = manager.create_session("alice");
        let (_id2, _e2) = manager.create_session("bob");
        assert_eq!(manager.active_session_count(), 2);
        let listing = manager.list_sessions();
        assert_eq!(listing.len(), 2);
        assert!(listing.iter().any(|s| s.session_id == id1 && s.user_id == "alice"));
    }
}

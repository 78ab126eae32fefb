//! The per-session runtime seam (§4.3/§4.5).
//!
//! `ak-sessions` owns session lifecycle — creation, submission routing,
//! bounded-wait shutdown — but not the turn loop itself. The gateway
//! supplies a [`SessionRuntime`] per session (its Turn Engine bound to one
//! conversation) through a [`SessionRuntimeFactory`]; [`crate::manager::SessionManager`]
//! just owns the task that feeds it operations and forwards its events.

use ak_domain::error::Result;
use ak_domain::event::Event;
use ak_domain::operation::Operation;
use tokio::sync::mpsc;

/// One conversation's turn loop. `process_submission` is called once per
/// operation taken off the session's queue, in order; it's expected to emit
/// events on the sender it was constructed with as it goes.
#[async_trait::async_trait]
pub trait SessionRuntime: Send {
    async fn process_submission(&mut self, op: Operation) -> Result<()>;
}

/// Builds a fresh [`SessionRuntime`] for a newly created session, wired to
/// that session's event sender.
pub trait SessionRuntimeFactory: Send + Sync {
    fn create(&self, user_id: &str, session_id: &str, events: mpsc::UnboundedSender<Event>) -> Box<dyn SessionRuntime>;
}

//! Per-session interrupt tokens (§4.3.3's Interrupt operation).
//!
//! Grounded on the teacher's `runtime/cancel.rs`, simplified: the original's
//! cascading parent→child groups existed for its sub-agent feature, which
//! has no counterpart here — one session, one token.
//!
//! Interrupt must be able to reach a session's *currently running* turn
//! even while that turn is mid-await inside `SessionManager`'s single-
//! consumer submission queue — the queue itself can't service an Interrupt
//! operation sitting behind a long LLM call. So the transport layer routes
//! `Operation::Interrupt` straight to this registry instead of enqueuing
//! it through `SessionManager::submit`.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct CancelRegistry {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh token for a session, replacing any previous one.
    pub fn register(&self, session_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.lock().insert(session_id.to_string(), token.clone());
        token
    }

    /// Cancel the session's current token, if any. Returns `true` if a
    /// token was found (the queue-based Interrupt path still treats a miss
    /// as a no-op, not an error — there may simply be no turn running).
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.tokens.lock().get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, session_id: &str) {
        self.tokens.lock().remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_cancel_signals_token() {
        let registry = CancelRegistry::new();
        let token = registry.register("s1");
        assert!(!token.is_cancelled());
        assert!(registry.cancel("s1"));
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_unknown_session_returns_false() {
        let registry = CancelRegistry::new();
        assert!(!registry.cancel("ghost"));
    }

    #[test]
    fn register_replaces_previous_token() {
        let registry = CancelRegistry::new();
        let old = registry.register("s1");
        let new = registry.register("s1");
        registry.cancel("s1");
        assert!(!old.is_cancelled());
        assert!(new.is_cancelled());
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = CancelRegistry::new();
        registry.register("s1");
        registry.remove("s1");
        registry.remove("s1");
        assert!(!registry.cancel("s1"));
    }
}

//! Connection Registry (§4.8) — tracks the live outbound sender for every
//! connected session so the Lifecycle Manager can broadcast a shutdown
//! notice without reaching into the Session Manager's own registry.
//!
//! Grounded on the teacher's `nodes/registry.rs` `NodeRegistry` (a
//! connection-id-keyed map of outbound senders with `register`/`remove`/
//! touch-on-activity), simplified to one entry per session instead of one
//! per physical node connection — this runtime has no node fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use ak_domain::Event;
use parking_lot::RwLock;
use tokio::sync::mpsc;

#[derive(Default)]
pub struct ConnectionRegistry {
    conns: RwLock<HashMap<String, mpsc::UnboundedSender<Event>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session_id: &str, sender: mpsc::UnboundedSender<Event>) {
        self.conns.write().insert(session_id.to_string(), sender);
    }

    pub fn remove(&self, session_id: &str) {
        self.conns.write().remove(session_id);
    }

    /// Send to one session's socket. A failed send (socket already closed)
    /// deregisters the entry but never propagates as an error — the
    /// connection's own reader loop notices the same closure independently.
    pub fn send_event(&self, session_id: &str, event: Event) -> bool {
        let sent = self.conns.read().get(session_id).map(|tx| tx.send(event).is_ok()).unwrap_or(false);
        if !sent {
            self.remove(session_id);
        }
        sent
    }

    pub fn broadcast(&self, event: Event) {
        let conns = self.conns.read();
        for tx in conns.values() {
            let _ = tx.send(event.clone());
        }
    }

    pub fn connected_count(&self) -> usize {
        self.conns.read().len()
    }
}

pub type SharedConnectionRegistry = Arc<ConnectionRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use ak_domain::event::EventType;

    #[test]
    fn broadcast_reaches_every_registered_connection() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.register("s1", tx1);
        registry.register("s2", tx2);
        registry.broadcast(Event::bare(EventType::Shutdown));
        assert_eq!(rx1.try_recv().unwrap().event_type, EventType::Shutdown);
        assert_eq!(rx2.try_recv().unwrap().event_type, EventType::Shutdown);
    }

    #[test]
    fn send_to_closed_connection_deregisters_it() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register("s1", tx);
        drop(rx);
        assert!(!registry.send_event("s1", Event::bare(EventType::Ready)));
        assert_eq!(registry.connected_count(), 0);
    }
}

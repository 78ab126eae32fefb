//! Layer A — the in-process indexed session table (§4.6).
//!
//! A local embedded analytical database, in the sense of "fast in-memory
//! queries with a small number of indexed access patterns", not a SQL
//! engine: one map keyed by session_id, with the (user_id, status,
//! updated_at) and is_dirty access patterns served by filtering rather than
//! a real secondary index, since the expected row count per process is in
//! the thousands, not millions (see SPEC_FULL.md §9 Open Question).

use std::collections::HashMap;

use ak_domain::session::{PersistedSession, SessionIndexEntry, SessionStatus};
use parking_lot::RwLock;

struct Row {
    session: PersistedSession,
    is_dirty: bool,
}

pub struct LayerA {
    rows: RwLock<HashMap<String, Row>>,
}

impl Default for LayerA {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerA {
    pub fn new() -> Self {
        Self { rows: RwLock::new(HashMap::new()) }
    }

    /// Upsert a session and mark it dirty, bumping its version. Any mutation
    /// (new message, status change, deletion) goes through this.
    pub fn mark_dirty(&self, mut session: PersistedSession) {
        let mut rows = self.rows.write();
        session.version = rows.get(&session.session_id).map(|r| r.session.version + 1).unwrap_or(session.version.max(1));
        session.updated_at = chrono::Utc::now();
        rows.insert(session.session_id.clone(), Row { session, is_dirty: true });
    }

    /// Insert a row during recovery without marking it dirty. Skipped if an
    /// existing row already has an equal-or-newer version (later files in
    /// recovery order win, but within one batch the higher version wins).
    pub fn recover_insert(&self, session: PersistedSession) {
        let mut rows = self.rows.write();
        let should_insert = match rows.get(&session.session_id) {
            Some(existing) => session.version >= existing.session.version,
            None => true,
        };
        if should_insert {
            rows.insert(session.session_id.clone(), Row { session, is_dirty: false });
        }
    }

    pub fn get(&self, session_id: &str, user_id: Option<&str>) -> Option<PersistedSession> {
        let rows = self.rows.read();
        let row = rows.get(session_id)?;
        if let Some(uid) = user_id {
            if row.session.user_id != uid {
                return None;
            }
        }
        Some(row.session.clone())
    }

    pub fn list_user_sessions(&self, user_id: &str, limit: usize, offset: usize, include_archived: bool) -> Vec<SessionIndexEntry> {
        let rows = self.rows.read();
        let mut matched: Vec<&PersistedSession> = rows
            .values()
            .map(|r| &r.session)
            .filter(|s| s.user_id == user_id)
            .filter(|s| match s.status {
                SessionStatus::Active => true,
                SessionStatus::Archived => include_archived,
                SessionStatus::Deleted => false,
            })
            .collect();
        matched.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        matched.into_iter().skip(offset).take(limit).map(SessionIndexEntry::from).collect()
    }

    /// Soft-delete: sets status=deleted, bumps version, marks dirty. Returns
    /// false if the session doesn't exist or belongs to a different user.
    pub fn delete(&self, session_id: &str, user_id: &str) -> bool {
        let mut rows = self.rows.write();
        let Some(row) = rows.get_mut(session_id) else { return false };
        if row.session.user_id != user_id {
            return false;
        }
        row.session.status = SessionStatus::Deleted;
        row.session.version += 1;
        row.session.updated_at = chrono::Utc::now();
        row.is_dirty = true;
        true
    }

    /// Snapshot of every dirty row, for a sync tick.
    pub fn dirty_rows(&self) -> Vec<PersistedSession> {
        self.rows.read().values().filter(|r| r.is_dirty).map(|r| r.session.clone()).collect()
    }

    pub fn mark_synced(&self, session_ids: &[String]) {
        let mut rows = self.rows.write();
        for id in session_ids {
            if let Some(row) = rows.get_mut(id) {
                row.is_dirty = false;
            }
        }
    }

    pub fn dirty_count(&self) -> usize {
        self.rows.read().values().filter(|r| r.is_dirty).count()
    }

    pub fn session_count(&self, user_id: Option<&str>) -> usize {
        let rows = self.rows.read();
        rows.values()
            .filter(|r| r.session.status != SessionStatus::Deleted)
            .filter(|r| user_id.map(|uid| r.session.user_id == uid).unwrap_or(true))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ak_domain::session::PersistedSession;

    fn sample(id: &str, user: &str) -> PersistedSession {
        let now = chrono::Utc::now();
        PersistedSession {
            session_id: id.into(),
            user_id: user.into(),
            version: 0,
            created_at: now,
            updated_at: now,
            title: "Untitled".into(),
            model_name: "test-model".into(),
            status: SessionStatus::Active,
            messages_json: "[]".into(),
            context_summary: None,
            metadata_json: "{}".into(),
            message_count: 0,
            last_message_preview: String::new(),
        }
    }

    #[test]
    fn mark_dirty_then_get_round_trips() {
        let layer = LayerA::new();
        layer.mark_dirty(sample("s1", "alice"));
        let got = layer.get("s1", Some("alice")).unwrap();
        assert_eq!(got.session_id, "s1");
        assert_eq!(got.version, 1);
    }

    #[test]
    fn get_enforces_user_isolation() {
        let layer = LayerA::new();
        layer.mark_dirty(sample("s1", "alice"));
        assert!(layer.get("s1", Some("mallory")).is_none());
    }

    #[test]
    fn version_strictly_increases_on_each_mark_dirty() {
        let layer = LayerA::new();
        layer.mark_dirty(sample("s1", "alice"));
        layer.mark_dirty(sample("s1", "alice"));
        assert_eq!(layer.get("s1", None).unwrap().version, 2);
    }

    #[test]
    fn list_user_sessions_excludes_other_users_and_deleted() {
        let layer = LayerA::new();
        layer.mark_dirty(sample("s1", "alice"));
        layer.mark_dirty(sample("s2", "bob"));
        layer.delete("s1", "alice");
        let listing = layer.list_user_sessions("alice", 50, 0, false);
        assert!(listing.is_empty());
        let bob_listing = layer.list_user_sessions("bob", 50, 0, false);
        assert_eq!(bob_listing.len(), 1);
    }

    #[test]
    fn delete_fails_for_wrong_owner() {
        let layer = LayerA::new();
        layer.mark_dirty(sample("s1", "alice"));
        assert!(!layer.delete("s1", "mallory"));
    }

    #[test]
    fn dirty_rows_and_mark_synced() {
        let layer = LayerA::new();
        layer.mark_dirty(sample("s1", "alice"));
        assert_eq!(layer.dirty_count(), 1);
        layer.mark_synced(&["s1".to_string()]);
        assert_eq!(layer.dirty_count(), 0);
    }

    #[test]
    fn recover_insert_keeps_higher_version() {
        let layer = LayerA::new();
        let mut older = sample("s1", "alice");
        older.version = 1;
        let mut newer = sample("s1", "alice");
        newer.version = 2;
        layer.recover_insert(older);
        layer.recover_insert(newer.clone());
        let mut stale = sample("s1", "alice");
        stale.version = 1;
        layer.recover_insert(stale);
        assert_eq!(layer.get("s1", None).unwrap().version, 2);
    }
}

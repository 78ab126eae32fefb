//! The two-layer Persistence Engine (§4.6): a fast in-process [`LayerA`]
//! table that serves every read, and a durable [`LayerB`] object-store
//! mirror synced on a background timer.

pub mod layer_a;
pub mod layer_b;

use std::sync::Arc;

use ak_domain::config::PersistenceConfig;
use ak_domain::error::Result;
use ak_domain::session::{PersistedSession, SessionIndexEntry};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use layer_a::LayerA;
pub use layer_b::LayerB;

/// Owns both persistence layers and the background sync task.
pub struct PersistenceEngine {
    layer_a: Arc<LayerA>,
    layer_b: Arc<LayerB>,
    sync_task: Option<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl PersistenceEngine {
    pub fn from_config(config: &PersistenceConfig) -> Result<Self> {
        let layer_a = Arc::new(LayerA::new());
        let layer_b = Arc::new(LayerB::from_config(config)?);
        let (shutdown, _) = watch::channel(false);
        Ok(Self { layer_a, layer_b, sync_task: None, shutdown })
    }

    pub fn layer_a(&self) -> &Arc<LayerA> {
        &self.layer_a
    }

    /// Recover Layer A from Layer B, then start the background sync loop.
    /// Idempotent: calling twice is a no-op on the second call.
    pub async fn start(&mut self) {
        if self.sync_task.is_some() {
            return;
        }

        match self.layer_b.recover(&self.layer_a).await {
            Ok(n) => tracing::info!(recovered = n, "persistence engine recovered sessions on startup"),
            Err(e) => tracing::warn!(error = %e, "persistence engine recovery failed, starting with an empty table"),
        }

        let layer_a = self.layer_a.clone();
        let layer_b = self.layer_b.clone();
        let mut shutdown = self.shutdown.subscribe();
        self.sync_task = Some(tokio::spawn(async move {
            loop {
                let consecutive_failures = layer_b.consecutive_failures();
                let wait = layer_b.backoff_after(consecutive_failures);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = shutdown.changed() => break,
                }
                if *shutdown.borrow() {
                    break;
                }
                if let Err(e) = layer_b.sync_dirty(&layer_a).await {
                    tracing::error!(error = %e, "background sync tick failed");
                }
            }
        }));
    }

    /// Stop the background task and flush whatever is still dirty,
    /// best-effort (mirrors `stop()` in the original — shutdown never fails
    /// on a sync error).
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.sync_task.take() {
            let _ = task.await;
        }
        if let Err(e) = self.layer_b.sync_dirty(&self.layer_a).await {
            tracing::warn!(error = %e, "final sync failed during shutdown");
        }
    }

    pub async fn force_sync(&self) -> Result<usize> {
        self.layer_b.sync_dirty(&self.layer_a).await
    }

    pub fn mark_dirty(&self, session: PersistedSession) {
        self.layer_a.mark_dirty(session);
    }

    pub fn get(&self, session_id: &str, user_id: Option<&str>) -> Option<PersistedSession> {
        self.layer_a.get(session_id, user_id)
    }

    pub fn list_user_sessions(&self, user_id: &str, limit: usize, offset: usize, include_archived: bool) -> Vec<SessionIndexEntry> {
        self.layer_a.list_user_sessions(user_id, limit, offset, include_archived)
    }

    pub fn delete(&self, session_id: &str, user_id: &str) -> bool {
        self.layer_a.delete(session_id, user_id)
    }
}

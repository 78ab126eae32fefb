//! Layer B — the durable remote store (§4.6).
//!
//! A parquet dataset in an object store, partitioned by year-month under
//! `sessions/`, plus a per-user `index/users/<user_id>.jsonl` mirror of the
//! index projection. Grounded on `hf_storage.py`'s batched-commit shape and
//! `duckdb_storage.py`'s parquet export/recovery path, generalized from
//! "Hugging Face Hub dataset repo" to any `object_store`-backed location.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ak_domain::config::PersistenceConfig;
use ak_domain::error::{Error, Result};
use ak_domain::session::{PersistedSession, SessionIndexEntry, SessionStatus};
use arrow::array::{Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use object_store::path::Path as StorePath;
use object_store::{ObjectStore, PutPayload};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

use crate::persistence::layer_a::LayerA;

const MAX_RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_SECS: u64 = 5;

fn schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("session_id", DataType::Utf8, false),
        Field::new("user_id", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, false),
        Field::new("model_name", DataType::Utf8, false),
        Field::new("status", DataType::Utf8, false),
        Field::new("created_at", DataType::Utf8, false),
        Field::new("updated_at", DataType::Utf8, false),
        Field::new("message_count", DataType::Int64, false),
        Field::new("last_message_preview", DataType::Utf8, false),
        Field::new("messages_json", DataType::Utf8, false),
        Field::new("context_summary", DataType::Utf8, true),
        Field::new("metadata_json", DataType::Utf8, false),
        Field::new("version", DataType::Int64, false),
    ]))
}

fn status_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Active => "active",
        SessionStatus::Archived => "archived",
        SessionStatus::Deleted => "deleted",
    }
}

fn status_from_str(s: &str) -> SessionStatus {
    match s {
        "archived" => SessionStatus::Archived,
        "deleted" => SessionStatus::Deleted,
        _ => SessionStatus::Active,
    }
}

fn sessions_to_batch(sessions: &[PersistedSession]) -> Result<RecordBatch> {
    let session_id: StringArray = sessions.iter().map(|s| Some(s.session_id.as_str())).collect();
    let user_id: StringArray = sessions.iter().map(|s| Some(s.user_id.as_str())).collect();
    let title: StringArray = sessions.iter().map(|s| Some(s.title.as_str())).collect();
    let model_name: StringArray = sessions.iter().map(|s| Some(s.model_name.as_str())).collect();
    let status: StringArray = sessions.iter().map(|s| Some(status_str(s.status))).collect();
    let created_at: StringArray = sessions.iter().map(|s| Some(s.created_at.to_rfc3339())).collect();
    let updated_at: StringArray = sessions.iter().map(|s| Some(s.updated_at.to_rfc3339())).collect();
    let message_count: Int64Array = sessions.iter().map(|s| Some(s.message_count as i64)).collect();
    let last_message_preview: StringArray = sessions.iter().map(|s| Some(s.last_message_preview.as_str())).collect();
    let messages_json: StringArray = sessions.iter().map(|s| Some(s.messages_json.as_str())).collect();
    let context_summary: StringArray = sessions.iter().map(|s| s.context_summary.as_deref()).collect();
    let metadata_json: StringArray = sessions.iter().map(|s| Some(s.metadata_json.as_str())).collect();
    let version: Int64Array = sessions.iter().map(|s| Some(s.version as i64)).collect();

    RecordBatch::try_new(
        schema(),
        vec![
            Arc::new(session_id),
            Arc::new(user_id),
            Arc::new(title),
            Arc::new(model_name),
            Arc::new(status),
            Arc::new(created_at),
            Arc::new(updated_at),
            Arc::new(message_count),
            Arc::new(last_message_preview),
            Arc::new(messages_json),
            Arc::new(context_summary),
            Arc::new(metadata_json),
            Arc::new(version),
        ],
    )
    .map_err(|e| Error::Persistence(format!("failed to build parquet batch: {e}")))
}

fn batch_to_sessions(batch: &RecordBatch) -> Result<Vec<PersistedSession>> {
    let col = |name: &str| -> Result<&StringArray> {
        batch
            .column_by_name(name)
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| Error::Persistence(format!("missing or malformed column '{name}'")))
    };
    let session_id = col("session_id")?;
    let user_id = col("user_id")?;
    let title = col("title")?;
    let model_name = col("model_name")?;
    let status = col("status")?;
    let created_at = col("created_at")?;
    let updated_at = col("updated_at")?;
    let last_message_preview = col("last_message_preview")?;
    let messages_json = col("messages_json")?;
    let context_summary = col("context_summary")?;
    let metadata_json = col("metadata_json")?;
    let message_count = batch
        .column_by_name("message_count")
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| Error::Persistence("missing column 'message_count'".into()))?;
    let version = batch
        .column_by_name("version")
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| Error::Persistence("missing column 'version'".into()))?;

    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        out.push(PersistedSession {
            session_id: session_id.value(i).to_string(),
            user_id: user_id.value(i).to_string(),
            version: version.value(i) as u64,
            created_at: chrono::DateTime::parse_from_rfc3339(created_at.value(i))
                .map_err(|e| Error::Persistence(format!("bad created_at: {e}")))?
                .with_timezone(&chrono::Utc),
            updated_at: chrono::DateTime::parse_from_rfc3339(updated_at.value(i))
                .map_err(|e| Error::Persistence(format!("bad updated_at: {e}")))?
                .with_timezone(&chrono::Utc),
            title: title.value(i).to_string(),
            model_name: model_name.value(i).to_string(),
            status: status_from_str(status.value(i)),
            messages_json: messages_json.value(i).to_string(),
            context_summary: if context_summary.is_null(i) { None } else { Some(context_summary.value(i).to_string()) },
            metadata_json: metadata_json.value(i).to_string(),
            message_count: message_count.value(i) as usize,
            last_message_preview: last_message_preview.value(i).to_string(),
        });
    }
    Ok(out)
}

fn write_parquet(sessions: &[PersistedSession]) -> Result<Vec<u8>> {
    let batch = sessions_to_batch(sessions)?;
    let mut buf = Vec::new();
    {
        let mut writer = ArrowWriter::try_new(&mut buf, schema(), None)
            .map_err(|e| Error::Persistence(format!("failed to open parquet writer: {e}")))?;
        writer.write(&batch).map_err(|e| Error::Persistence(format!("failed to write parquet batch: {e}")))?;
        writer.close().map_err(|e| Error::Persistence(format!("failed to close parquet writer: {e}")))?;
    }
    Ok(buf)
}

fn read_parquet(bytes: bytes::Bytes) -> Result<Vec<PersistedSession>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)
        .map_err(|e| Error::Persistence(format!("failed to open parquet reader: {e}")))?
        .build()
        .map_err(|e| Error::Persistence(format!("failed to build parquet reader: {e}")))?;
    let mut out = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| Error::Persistence(format!("failed to read parquet batch: {e}")))?;
        out.extend(batch_to_sessions(&batch)?);
    }
    Ok(out)
}

pub struct LayerB {
    store: Arc<dyn ObjectStore>,
    prefix: StorePath,
    sync_interval_secs: u64,
    max_backoff_secs: u64,
    consecutive_failures: AtomicU32,
}

impl LayerB {
    pub fn from_config(config: &PersistenceConfig) -> Result<Self> {
        let url = url::Url::parse(&config.object_store_url)
            .map_err(|e| Error::Config(format!("invalid object_store_url '{}': {e}", config.object_store_url)))?;
        let (store, prefix) = object_store::parse_url(&url)
            .map_err(|e| Error::Config(format!("failed to open object store '{}': {e}", config.object_store_url)))?;
        Ok(Self {
            store: Arc::from(store),
            prefix,
            sync_interval_secs: config.sync_interval_secs,
            max_backoff_secs: config.max_backoff_secs,
            consecutive_failures: AtomicU32::new(0),
        })
    }

    fn object_path(&self, suffix: &str) -> StorePath {
        self.prefix.parts().chain(StorePath::from(suffix).parts()).collect()
    }

    /// `min(sync_interval * 2^n, max_backoff)`, used by the background sync
    /// loop between ticks after `n` consecutive failures.
    pub fn backoff_after(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::from_secs(self.sync_interval_secs);
        }
        let scaled = self.sync_interval_secs.saturating_mul(1u64 << consecutive_failures.min(32));
        Duration::from_secs(scaled.min(self.max_backoff_secs))
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Export all dirty Layer A rows to a new parquet batch, upload it, and
    /// rebuild the per-user index files it touches. Returns the number of
    /// sessions synced. A no-op (and failure counter reset) when there's
    /// nothing dirty.
    pub async fn sync_dirty(&self, layer_a: &LayerA) -> Result<usize> {
        let dirty = layer_a.dirty_rows();
        if dirty.is_empty() {
            return Ok(0);
        }

        match self.try_sync_batch(&dirty).await {
            Ok(()) => {
                let ids: Vec<String> = dirty.iter().map(|s| s.session_id.clone()).collect();
                layer_a.mark_synced(&ids);
                self.consecutive_failures.store(0, Ordering::Relaxed);
                tracing::info!(count = dirty.len(), "synced dirty sessions to durable store");
                Ok(dirty.len())
            }
            Err(e) => {
                self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %e, "sync to durable store failed, rows remain dirty");
                Err(e)
            }
        }
    }

    async fn try_sync_batch(&self, dirty: &[PersistedSession]) -> Result<()> {
        let now = chrono::Utc::now();
        let batch_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let filename = format!("batch_{}_{batch_id}.parquet", now.format("%Y%m%d_%H%M%S"));
        let remote_path = self.object_path(&format!("sessions/{}/{filename}", now.format("%Y-%m")));

        let bytes = write_parquet(dirty)?;
        self.put_with_retry(&remote_path, bytes).await?;

        let mut by_user: std::collections::HashMap<String, Vec<SessionIndexEntry>> = std::collections::HashMap::new();
        for session in dirty {
            by_user.entry(session.user_id.clone()).or_default().push(SessionIndexEntry::from(session));
        }
        for (user_id, entries) in by_user {
            self.rebuild_user_index(&user_id, entries).await?;
        }
        Ok(())
    }

    /// Upload with a dedicated 5s/10s/20s retry, distinct from the
    /// tick-to-tick exponential backoff — mirrors the original's separate
    /// handling of rate-limit responses within a single sync attempt.
    async fn put_with_retry(&self, path: &StorePath, bytes: Vec<u8>) -> Result<()> {
        let mut last_err = None;
        for attempt in 0..MAX_RETRY_ATTEMPTS {
            let payload = PutPayload::from(bytes.clone());
            match self.store.put(path, payload).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    let wait = Duration::from_secs(RETRY_BASE_SECS * (1 << attempt));
                    tracing::warn!(attempt, error = %e, wait_secs = wait.as_secs(), "put failed, retrying");
                    last_err = Some(e);
                    tokio::time::sleep(wait).await;
                }
            }
        }
        Err(Error::Persistence(format!(
            "failed to upload {path} after {MAX_RETRY_ATTEMPTS} attempts: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn rebuild_user_index(&self, user_id: &str, new_entries: Vec<SessionIndexEntry>) -> Result<()> {
        let index_path = self.object_path(&format!("index/users/{user_id}.jsonl"));

        let mut merged: std::collections::HashMap<String, SessionIndexEntry> = std::collections::HashMap::new();
        if let Ok(existing) = self.store.get(&index_path).await {
            if let Ok(bytes) = existing.bytes().await {
                for line in String::from_utf8_lossy(&bytes).lines() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Ok(entry) = serde_json::from_str::<SessionIndexEntry>(line) {
                        merged.insert(entry.session_id.clone(), entry);
                    }
                }
            }
        }
        for entry in new_entries {
            merged.insert(entry.session_id.clone(), entry);
        }

        let mut lines: Vec<String> = merged.values().map(|e| serde_json::to_string(e)).collect::<std::result::Result<_, _>>()?;
        lines.sort();
        let content = lines.join("\n");
        self.put_with_retry(&index_path, content.into_bytes()).await
    }

    /// List parquet batches under `sessions/`, sorted so later files
    /// (lexicographically, since filenames are timestamp-prefixed) are
    /// applied last and win ties; each row's own `version` breaks ties
    /// within a single batch via [`LayerA::recover_insert`]. Falls back to
    /// legacy per-session JSON files when no parquet batches exist.
    pub async fn recover(&self, layer_a: &LayerA) -> Result<usize> {
        use futures_util::StreamExt;

        let sessions_prefix = self.object_path("sessions/");
        let mut names: Vec<StorePath> = Vec::new();
        let mut listing = self.store.list(Some(&sessions_prefix));
        while let Some(meta) = listing.next().await {
            match meta {
                Ok(meta) if meta.location.as_ref().ends_with(".parquet") => names.push(meta.location),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "error listing durable store during recovery");
                }
            }
        }
        names.sort_by(|a, b| a.as_ref().cmp(b.as_ref()));

        if names.is_empty() {
            return self.recover_from_legacy_json(layer_a).await;
        }

        let mut recovered = 0usize;
        for path in &names {
            match self.store.get(path).await {
                Ok(result) => match result.bytes().await {
                    Ok(bytes) => match read_parquet(bytes) {
                        Ok(sessions) => {
                            for session in sessions {
                                if session.status != SessionStatus::Deleted {
                                    layer_a.recover_insert(session);
                                    recovered += 1;
                                }
                            }
                        }
                        Err(e) => tracing::debug!(path = %path, error = %e, "failed to parse parquet batch during recovery"),
                    },
                    Err(e) => tracing::debug!(path = %path, error = %e, "failed to fetch parquet batch during recovery"),
                },
                Err(e) => tracing::debug!(path = %path, error = %e, "failed to read parquet batch during recovery"),
            }
        }
        tracing::info!(recovered, batches = names.len(), "recovered sessions from durable store");
        Ok(recovered)
    }

    async fn recover_from_legacy_json(&self, layer_a: &LayerA) -> Result<usize> {
        use futures_util::StreamExt;

        let sessions_prefix = self.object_path("sessions/");
        let mut names: Vec<StorePath> = Vec::new();
        let mut listing = self.store.list(Some(&sessions_prefix));
        while let Some(meta) = listing.next().await {
            if let Ok(meta) = meta {
                if meta.location.as_ref().ends_with(".json") {
                    names.push(meta.location);
                }
            }
        }

        let mut recovered = 0usize;
        for path in names.iter().take(500) {
            if let Ok(result) = self.store.get(path).await {
                if let Ok(bytes) = result.bytes().await {
                    if let Ok(session) = serde_json::from_slice::<PersistedSession>(&bytes) {
                        layer_a.recover_insert(session);
                        recovered += 1;
                    }
                }
            }
        }
        tracing::info!(recovered, "recovered sessions from legacy JSON fallback");
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ak_domain::session::PersistedSession;

    fn sample(id: &str) -> PersistedSession {
        let now = chrono::Utc::now();
        PersistedSession {
            session_id: id.into(),
            user_id: "alice".into(),
            version: 3,
            created_at: now,
            updated_at: now,
            title: "Chat".into(),
            model_name: "gpt-4o".into(),
            status: SessionStatus::Active,
            messages_json: "[]".into(),
            context_summary: Some("summary".into()),
            metadata_json: "{}".into(),
            message_count: 2,
            last_message_preview: "hi".into(),
        }
    }

    #[test]
    fn parquet_round_trips_session_fields() {
        let sessions = vec![sample("s1"), sample("s2")];
        let bytes = write_parquet(&sessions).unwrap();
        let back = read_parquet(bytes::Bytes::from(bytes)).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].session_id, "s1");
        assert_eq!(back[0].version, 3);
        assert_eq!(back[0].context_summary.as_deref(), Some("summary"));
    }

    #[test]
    fn parquet_round_trips_null_context_summary() {
        let mut s = sample("s1");
        s.context_summary = None;
        let bytes = write_parquet(&[s]).unwrap();
        let back = read_parquet(bytes::Bytes::from(bytes)).unwrap();
        assert!(back[0].context_summary.is_none());
    }

    fn backoff_store() -> LayerB {
        LayerB {
            store: Arc::new(object_store::memory::InMemory::new()),
            prefix: StorePath::from(""),
            sync_interval_secs: 30,
            max_backoff_secs: 300,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    #[test]
    fn backoff_caps_at_max() {
        let layer_b = backoff_store();
        assert_eq!(layer_b.backoff_after(0), Duration::from_secs(30));
        assert_eq!(layer_b.backoff_after(1), Duration::from_secs(60));
        assert_eq!(layer_b.backoff_after(10), Duration::from_secs(300));
    }
}

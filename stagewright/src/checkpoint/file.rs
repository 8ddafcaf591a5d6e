//! JSON-file checkpoint store: one file per run, rewritten atomically.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::CheckpointStore;
use crate::core::Checkpoint;
use crate::errors::CheckpointError;

/// Durable store writing `<dir>/<hex of run id>.json`.
///
/// Each write goes to a temporary file that is renamed over the original,
/// so a crash never leaves a torn file behind.
#[derive(Debug)]
pub struct JsonFileCheckpointStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileCheckpointStore {
    /// Creates a store rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // Hex keeps distinct run ids on distinct files.
    fn run_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", hex::encode(run_id)))
    }

    async fn read(&self, run_id: &str) -> Result<HashMap<String, Checkpoint>, CheckpointError> {
        let mut rows: HashMap<String, Checkpoint> = match tokio::fs::read(self.run_path(run_id)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        rows.retain(|stage_key, row| {
            let owned = row.run_id == run_id;
            if !owned {
                warn!(run_id, stage_key, found = %row.run_id, "Ignoring checkpoint row of another run");
            }
            owned
        });
        Ok(rows)
    }

    async fn write(&self, run_id: &str, rows: &HashMap<String, Checkpoint>) -> Result<(), CheckpointError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.run_path(run_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(rows)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(run_id, path = %path.display(), rows = rows.len(), "Wrote checkpoints");
        Ok(())
    }

    async fn update(&self, run_id: &str, stage_key: &str, apply: impl FnOnce(&mut Checkpoint) + Send) -> Result<(), CheckpointError> {
        let _guard = self.write_lock.lock().await;
        let mut rows = self.read(run_id).await?;
        let row = rows
            .entry(stage_key.to_string())
            .or_insert_with(|| Checkpoint::new(run_id, stage_key));
        apply(row);
        self.write(run_id, &rows).await
    }
}

#[async_trait]
impl CheckpointStore for JsonFileCheckpointStore {
    async fn mark_started(&self, run_id: &str, stage_key: &str, attempt: u32) -> Result<(), CheckpointError> {
        self.update(run_id, stage_key, |row| row.apply_started(attempt)).await
    }

    async fn mark_completed(
        &self,
        run_id: &str,
        stage_key: &str,
        payload: serde_json::Value,
        duration_ms: u64,
    ) -> Result<(), CheckpointError> {
        self.update(run_id, stage_key, |row| row.apply_completed(payload, duration_ms))
            .await
    }

    async fn mark_failed(&self, run_id: &str, stage_key: &str, error: &str, duration_ms: u64) -> Result<(), CheckpointError> {
        let error = error.to_string();
        self.update(run_id, stage_key, move |row| row.apply_failed(error, duration_ms))
            .await
    }

    async fn load_run(&self, run_id: &str) -> Result<HashMap<String, Checkpoint>, CheckpointError> {
        self.read(run_id).await
    }

    async fn clear_run(&self, run_id: &str) -> Result<(), CheckpointError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.run_path(run_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CheckpointStatus;

    #[tokio::test]
    async fn test_rows_survive_a_new_store() {
        let dir = tempfile::tempdir().unwrap();

        let store = JsonFileCheckpointStore::new(dir.path());
        store.mark_started("prog:college:2025-01-01", "a", 1).await.unwrap();
        store
            .mark_completed("prog:college:2025-01-01", "a", serde_json::json!({"jobs": 12}), 40)
            .await
            .unwrap();

        let reopened = JsonFileCheckpointStore::new(dir.path());
        let rows = reopened.load_run("prog:college:2025-01-01").await.unwrap();
        assert_eq!(rows["a"].status, CheckpointStatus::Completed);
        assert_eq!(rows["a"].payload["jobs"], 12);
    }

    #[tokio::test]
    async fn test_similar_run_ids_stay_apart() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileCheckpointStore::new(dir.path());

        store
            .mark_completed("acme:2025-01-01", "collect", serde_json::json!({"jobs": 3}), 10)
            .await
            .unwrap();

        assert!(store.load_run("acme_2025-01-01").await.unwrap().is_empty());
        assert_eq!(store.load_run("acme:2025-01-01").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rows_of_another_run_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileCheckpointStore::new(dir.path());

        let mut rows = HashMap::new();
        rows.insert("collect".to_string(), Checkpoint::new("other-run", "collect"));
        rows.insert("score".to_string(), Checkpoint::new("run", "score"));
        tokio::fs::write(store.run_path("run"), serde_json::to_vec(&rows).unwrap())
            .await
            .unwrap();

        let loaded = store.load_run("run").await.unwrap();
        assert_eq!(loaded.keys().collect::<Vec<_>>(), vec!["score"]);
    }

    #[tokio::test]
    async fn test_missing_run_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileCheckpointStore::new(dir.path().join("nested"));
        assert!(store.load_run("nope").await.unwrap().is_empty());
        store.clear_run("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_then_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileCheckpointStore::new(dir.path());

        store.mark_started("run", "a", 1).await.unwrap();
        store.mark_failed("run", "a", "timed out", 9).await.unwrap();
        let rows = store.load_run("run").await.unwrap();
        assert_eq!(rows["a"].error.as_deref(), Some("timed out"));

        store.clear_run("run").await.unwrap();
        assert!(store.load_run("run").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileCheckpointStore::new(dir.path());
        tokio::fs::write(store.run_path("run"), b"{not json").await.unwrap();

        assert!(matches!(store.load_run("run").await, Err(CheckpointError::Serialization(_))));
    }
}

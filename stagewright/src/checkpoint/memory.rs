//! In-memory checkpoint store.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;

use super::CheckpointStore;
use crate::core::Checkpoint;
use crate::errors::CheckpointError;

/// Process-local store. Each (run, stage) row is upserted atomically
/// through the map's entry API.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    rows: DashMap<(String, String), Checkpoint>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of rows across all runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the store holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns one row.
    #[must_use]
    pub fn get(&self, run_id: &str, stage_key: &str) -> Option<Checkpoint> {
        self.rows
            .get(&(run_id.to_string(), stage_key.to_string()))
            .map(|row| row.clone())
    }

    /// Inserts a row as-is, replacing any existing one.
    pub fn insert(&self, checkpoint: Checkpoint) {
        let key = (checkpoint.run_id.clone(), checkpoint.stage_key.clone());
        self.rows.insert(key, checkpoint);
    }

    fn upsert(&self, run_id: &str, stage_key: &str, apply: impl FnOnce(&mut Checkpoint)) {
        let mut row = self
            .rows
            .entry((run_id.to_string(), stage_key.to_string()))
            .or_insert_with(|| Checkpoint::new(run_id, stage_key));
        apply(&mut row);
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn mark_started(&self, run_id: &str, stage_key: &str, attempt: u32) -> Result<(), CheckpointError> {
        self.upsert(run_id, stage_key, |row| row.apply_started(attempt));
        Ok(())
    }

    async fn mark_completed(
        &self,
        run_id: &str,
        stage_key: &str,
        payload: serde_json::Value,
        duration_ms: u64,
    ) -> Result<(), CheckpointError> {
        self.upsert(run_id, stage_key, |row| row.apply_completed(payload, duration_ms));
        Ok(())
    }

    async fn mark_failed(&self, run_id: &str, stage_key: &str, error: &str, duration_ms: u64) -> Result<(), CheckpointError> {
        self.upsert(run_id, stage_key, |row| row.apply_failed(error, duration_ms));
        Ok(())
    }

    async fn load_run(&self, run_id: &str) -> Result<HashMap<String, Checkpoint>, CheckpointError> {
        Ok(self
            .rows
            .iter()
            .filter(|entry| entry.key().0 == run_id)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect())
    }

    async fn clear_run(&self, run_id: &str) -> Result<(), CheckpointError> {
        self.rows.retain(|(run, _), _| run != run_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CheckpointStatus;

    #[tokio::test]
    async fn test_upsert_lifecycle() {
        let store = InMemoryCheckpointStore::new();

        store.mark_started("run", "a", 1).await.unwrap();
        assert_eq!(store.get("run", "a").unwrap().status, CheckpointStatus::Started);

        store.mark_failed("run", "a", "boom", 10).await.unwrap();
        store.mark_started("run", "a", 2).await.unwrap();
        store.mark_completed("run", "a", serde_json::json!([1, 2]), 20).await.unwrap();

        let row = store.get("run", "a").unwrap();
        assert_eq!(row.status, CheckpointStatus::Completed);
        assert_eq!(row.attempts, 2);
        assert_eq!(row.payload, serde_json::json!([1, 2]));
    }

    #[tokio::test]
    async fn test_started_does_not_demote_completed() {
        let store = InMemoryCheckpointStore::new();
        store.mark_completed("run", "a", serde_json::json!("done"), 1).await.unwrap();
        store.mark_started("run", "a", 1).await.unwrap();

        assert_eq!(store.get("run", "a").unwrap().status, CheckpointStatus::Completed);
    }

    #[tokio::test]
    async fn test_load_run_scopes_by_run() {
        let store = InMemoryCheckpointStore::new();
        store.mark_started("run-1", "a", 1).await.unwrap();
        store.mark_started("run-1", "b", 1).await.unwrap();
        store.mark_started("run-2", "a", 1).await.unwrap();

        let rows = store.load_run("run-1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.contains_key("a") && rows.contains_key("b"));
    }

    #[tokio::test]
    async fn test_clear_run() {
        let store = InMemoryCheckpointStore::new();
        store.mark_started("run-1", "a", 1).await.unwrap();
        store.mark_started("run-2", "a", 1).await.unwrap();

        store.clear_run("run-1").await.unwrap();

        assert!(store.load_run("run-1").await.unwrap().is_empty());
        assert_eq!(store.len(), 1);
    }
}

//! Checkpoint persistence.
//!
//! A checkpoint store records each stage's last known status, attempt count
//! and resumable payload, keyed by (run, stage). Stores are a resume aid:
//! the executor talks to them through [`Checkpoints`], which logs and
//! swallows every backend error so a failing store never blocks a stage.

mod file;
mod memory;

pub use file::JsonFileCheckpointStore;
pub use memory::InMemoryCheckpointStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::core::Checkpoint;
use crate::errors::CheckpointError;

/// Backend for per-stage checkpoints.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Upserts a `started` row. A completed row is left untouched and the
    /// stored attempt count never decreases.
    async fn mark_started(&self, run_id: &str, stage_key: &str, attempt: u32) -> Result<(), CheckpointError>;

    /// Upserts a `completed` row with its payload.
    async fn mark_completed(
        &self,
        run_id: &str,
        stage_key: &str,
        payload: serde_json::Value,
        duration_ms: u64,
    ) -> Result<(), CheckpointError>;

    /// Upserts a `failed` row.
    async fn mark_failed(&self, run_id: &str, stage_key: &str, error: &str, duration_ms: u64) -> Result<(), CheckpointError>;

    /// Reads every row of a run, keyed by stage.
    async fn load_run(&self, run_id: &str) -> Result<HashMap<String, Checkpoint>, CheckpointError>;

    /// Deletes every row of a run.
    async fn clear_run(&self, run_id: &str) -> Result<(), CheckpointError>;
}

/// Best-effort facade over an optional [`CheckpointStore`].
///
/// With no store configured every write is a no-op and every read is empty,
/// so callers never branch on whether durable storage exists.
#[derive(Clone, Default)]
pub struct Checkpoints {
    store: Option<Arc<dyn CheckpointStore>>,
}

impl std::fmt::Debug for Checkpoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkpoints")
            .field("enabled", &self.store.is_some())
            .finish()
    }
}

impl Checkpoints {
    /// Wraps a store.
    #[must_use]
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store: Some(store) }
    }

    /// Creates a facade with no backing store.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Returns true if a store is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Loads a run's checkpoints; empty when unavailable.
    pub async fn load_run(&self, run_id: &str) -> HashMap<String, Checkpoint> {
        let Some(store) = &self.store else {
            return HashMap::new();
        };
        match store.load_run(run_id).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(run_id, error = %e, "Failed to load checkpoints; running every stage");
                HashMap::new()
            }
        }
    }

    /// Records an attempt start.
    pub async fn started(&self, run_id: &str, stage_key: &str, attempt: u32) {
        if let Some(store) = &self.store {
            if let Err(e) = store.mark_started(run_id, stage_key, attempt).await {
                warn!(run_id, stage = stage_key, attempt, error = %e, "Failed to write started checkpoint");
            }
        }
    }

    /// Records a successful attempt.
    pub async fn completed(&self, run_id: &str, stage_key: &str, payload: serde_json::Value, duration_ms: u64) {
        if let Some(store) = &self.store {
            if let Err(e) = store.mark_completed(run_id, stage_key, payload, duration_ms).await {
                warn!(run_id, stage = stage_key, error = %e, "Failed to write completed checkpoint");
            }
        }
    }

    /// Records a failed attempt.
    pub async fn failed(&self, run_id: &str, stage_key: &str, error: &str, duration_ms: u64) {
        if let Some(store) = &self.store {
            if let Err(e) = store.mark_failed(run_id, stage_key, error, duration_ms).await {
                warn!(run_id, stage = stage_key, error = %e, "Failed to write failed checkpoint");
            }
        }
    }

    /// Clears a run. Returns false if the store refused.
    pub async fn clear_run(&self, run_id: &str) -> bool {
        let Some(store) = &self.store else {
            return true;
        };
        match store.clear_run(run_id).await {
            Ok(()) => true,
            Err(e) => {
                warn!(run_id, error = %e, "Failed to clear checkpoints");
                false
            }
        }
    }
}

/// Builds a deterministic run key from subject components and a date.
///
/// Components are lowercased, runs of non-alphanumerics collapse to `-`,
/// and empty components are skipped, so the same subject analyzed on the
/// same day maps to the same key.
#[must_use]
pub fn build_run_key<S: AsRef<str>>(parts: &[S], date: NaiveDate) -> String {
    let mut segments: Vec<String> = parts
        .iter()
        .map(|p| normalize_component(p.as_ref()))
        .filter(|s| !s.is_empty())
        .collect();
    segments.push(date.format("%Y-%m-%d").to_string());
    segments.join(":")
}

fn normalize_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for ch in raw.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch);
        } else {
            pending_dash = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CheckpointStatus;

    #[test]
    fn test_build_run_key() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let key = build_run_key(&["  Cloud Computing  (AAS) ", "Lakeshore CC", ""], date);
        assert_eq!(key, "cloud-computing-aas:lakeshore-cc:2025-03-14");
    }

    #[test]
    fn test_build_run_key_is_deterministic() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        assert_eq!(
            build_run_key(&["Nursing", "X"], date),
            build_run_key(&["nursing!", " x "], date)
        );
    }

    #[tokio::test]
    async fn test_disabled_facade_is_inert() {
        let checkpoints = Checkpoints::disabled();
        checkpoints.started("run", "a", 1).await;
        checkpoints.completed("run", "a", serde_json::json!(1), 5).await;

        assert!(!checkpoints.is_enabled());
        assert!(checkpoints.load_run("run").await.is_empty());
        assert!(checkpoints.clear_run("run").await);
    }

    #[tokio::test]
    async fn test_facade_swallows_store_errors() {
        let mut store = MockCheckpointStore::new();
        store
            .expect_mark_started()
            .returning(|_, _, _| Err(CheckpointError::Unavailable("down".to_string())));
        store
            .expect_load_run()
            .returning(|_| Err(CheckpointError::Unavailable("down".to_string())));
        store
            .expect_clear_run()
            .returning(|_| Err(CheckpointError::Unavailable("down".to_string())));

        let checkpoints = Checkpoints::new(Arc::new(store));
        checkpoints.started("run", "a", 1).await;

        assert!(checkpoints.load_run("run").await.is_empty());
        assert!(!checkpoints.clear_run("run").await);
    }

    #[tokio::test]
    async fn test_facade_passes_through() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let checkpoints = Checkpoints::new(store.clone());

        checkpoints.started("run", "a", 1).await;
        checkpoints.completed("run", "a", serde_json::json!({"ok": true}), 12).await;

        let rows = checkpoints.load_run("run").await;
        assert_eq!(rows["a"].status, CheckpointStatus::Completed);
        assert_eq!(rows["a"].payload["ok"], true);
    }
}

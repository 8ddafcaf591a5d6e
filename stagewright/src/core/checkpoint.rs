//! Persisted per-stage checkpoint record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CheckpointStatus;

/// The durable record of a stage's last known state within a run.
///
/// A completed checkpoint's `payload` is sufficient to reconstruct the
/// stage's output without re-running it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The run the checkpoint belongs to.
    pub run_id: String,
    /// The stage key.
    pub stage_key: String,
    /// Current status.
    pub status: CheckpointStatus,
    /// Highest attempt number recorded.
    pub attempts: u32,
    /// Resumable result payload.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Error of the last failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the first recorded attempt started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the last attempt resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Duration of the last resolved attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Creates an empty checkpoint.
    #[must_use]
    pub fn new(run_id: impl Into<String>, stage_key: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            stage_key: stage_key.into(),
            status: CheckpointStatus::NotStarted,
            attempts: 0,
            payload: serde_json::Value::Null,
            error: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            updated_at: Utc::now(),
        }
    }

    /// Applies an attempt start. A completed checkpoint is never demoted.
    pub fn apply_started(&mut self, attempt: u32) {
        if self.status.is_resumable() {
            return;
        }
        let now = Utc::now();
        self.status = CheckpointStatus::Started;
        self.attempts = self.attempts.max(attempt);
        self.error = None;
        self.started_at = Some(now);
        self.completed_at = None;
        self.duration_ms = None;
        self.updated_at = now;
    }

    /// Applies a successful resolution.
    pub fn apply_completed(&mut self, payload: serde_json::Value, duration_ms: u64) {
        let now = Utc::now();
        self.status = CheckpointStatus::Completed;
        self.attempts = self.attempts.max(1);
        self.payload = payload;
        self.error = None;
        self.started_at.get_or_insert(now);
        self.completed_at = Some(now);
        self.duration_ms = Some(duration_ms);
        self.updated_at = now;
    }

    /// Applies a failed resolution. The previous payload is kept.
    pub fn apply_failed(&mut self, error: impl Into<String>, duration_ms: u64) {
        let now = Utc::now();
        self.status = CheckpointStatus::Failed;
        self.attempts = self.attempts.max(1);
        self.error = Some(error.into());
        self.started_at.get_or_insert(now);
        self.completed_at = Some(now);
        self.duration_ms = Some(duration_ms);
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_checkpoint() {
        let cp = Checkpoint::new("run", "stage");
        assert_eq!(cp.status, CheckpointStatus::NotStarted);
        assert_eq!(cp.attempts, 0);
        assert!(cp.payload.is_null());
    }

    #[test]
    fn test_started_then_completed() {
        let mut cp = Checkpoint::new("run", "stage");
        cp.apply_started(1);
        assert_eq!(cp.status, CheckpointStatus::Started);
        assert_eq!(cp.attempts, 1);

        cp.apply_completed(serde_json::json!({"score": 7}), 1200);
        assert_eq!(cp.status, CheckpointStatus::Completed);
        assert_eq!(cp.payload["score"], 7);
        assert_eq!(cp.duration_ms, Some(1200));
    }

    #[test]
    fn test_started_never_demotes_completed() {
        let mut cp = Checkpoint::new("run", "stage");
        cp.apply_completed(serde_json::json!([1]), 5);
        cp.apply_started(3);

        assert_eq!(cp.status, CheckpointStatus::Completed);
        assert_eq!(cp.attempts, 1);
    }

    #[test]
    fn test_attempts_keep_maximum() {
        let mut cp = Checkpoint::new("run", "stage");
        cp.apply_started(2);
        cp.apply_failed("boom", 10);
        cp.apply_started(1);

        assert_eq!(cp.attempts, 2);
        assert!(cp.error.is_none());
    }

    #[test]
    fn test_failed_keeps_payload() {
        let mut cp = Checkpoint::new("run", "stage");
        cp.payload = serde_json::json!({"partial": true});
        cp.apply_failed("boom", 10);

        assert_eq!(cp.status, CheckpointStatus::Failed);
        assert_eq!(cp.error.as_deref(), Some("boom"));
        assert_eq!(cp.payload["partial"], true);
    }
}

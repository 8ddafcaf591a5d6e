//! Per-stage reports and the aggregate run outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{RunStatus, StageRole, StageState};

/// How one attempt at a stage resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The work function returned a value.
    Succeeded,
    /// The work function returned an error.
    Failed,
    /// The stage's hard ceiling elapsed.
    TimedOut,
}

/// One try at a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Attempt number, starting at 1.
    pub number: u32,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// When the attempt resolved.
    pub ended_at: DateTime<Utc>,
    /// Resolution.
    pub outcome: AttemptOutcome,
    /// Error detail for failed attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AttemptRecord {
    /// Returns the attempt duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        u64::try_from((self.ended_at - self.started_at).num_milliseconds()).unwrap_or(0)
    }
}

/// What happened to one stage during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    /// Stage key.
    pub key: String,
    /// Human-readable label.
    pub label: String,
    /// Whether failure aborts the run.
    pub role: StageRole,
    /// Final state.
    pub state: StageState,
    /// Attempts made in this run (empty when resumed, disabled or not run).
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
    /// Stage result, present when usable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Last error, present when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Time spent in this stage during this run.
    pub duration_ms: u64,
}

impl StageReport {
    /// Creates a report with no attempts.
    #[must_use]
    pub fn new(key: impl Into<String>, label: impl Into<String>, role: StageRole, state: StageState) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            role,
            state,
            attempts: Vec::new(),
            result: None,
            error: None,
            duration_ms: 0,
        }
    }

    /// Returns the attempt numbers in order.
    #[must_use]
    pub fn attempt_numbers(&self) -> Vec<u32> {
        self.attempts.iter().map(|a| a.number).collect()
    }
}

/// The final outcome of a run, returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Run ID.
    pub run_id: String,
    /// Pipeline name.
    pub pipeline: String,
    /// Aggregate status.
    pub status: RunStatus,
    /// Reports in declaration order.
    pub stages: Vec<StageReport>,
    /// Collected error strings from failed stages.
    pub errors: Vec<String>,
    /// Annotations of what is missing from a partial artifact and why.
    pub missing: Vec<String>,
    /// The load-bearing stage that aborted the run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted_by: Option<String>,
    /// SHA-256 of the artifact stage result, if one was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_digest: Option<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration.
    pub duration_ms: u64,
}

impl RunOutcome {
    /// Returns the report for a stage.
    #[must_use]
    pub fn stage(&self, key: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.key == key)
    }

    /// Returns the result of a stage, if usable.
    #[must_use]
    pub fn result(&self, key: &str) -> Option<&serde_json::Value> {
        self.stage(key).and_then(|s| s.result.as_ref())
    }

    /// Returns true if the run produced a usable artifact.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.status != RunStatus::Error
    }
}

/// Computes the aggregate run status.
///
/// `artifact_stage`, when set, names the stage whose result is the artifact;
/// otherwise any usable stage counts as a usable artifact.
#[must_use]
pub fn aggregate_status(stages: &[StageReport], artifact_stage: Option<&str>, aborted: bool) -> RunStatus {
    if aborted {
        return RunStatus::Error;
    }

    let usable = match artifact_stage {
        Some(key) => stages.iter().any(|s| s.key == key && s.state.is_usable()),
        None => stages.iter().any(|s| s.state.is_usable()),
    };
    if !usable {
        return RunStatus::Error;
    }

    let failed = stages.iter().any(|s| s.state == StageState::Failed);
    if failed {
        RunStatus::Partial
    } else {
        RunStatus::Success
    }
}

/// Hex SHA-256 of a JSON value's compact serialization.
#[must_use]
pub fn digest_value(value: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

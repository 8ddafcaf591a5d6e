//! Status enums shared by checkpoints, stage reports and runs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Persisted status of a stage checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// No attempt has been recorded.
    #[default]
    NotStarted,
    /// An attempt is (or was, if interrupted) in flight.
    Started,
    /// The stage completed and its payload is resumable.
    Completed,
    /// The last attempt failed.
    Failed,
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Started => write!(f, "started"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl CheckpointStatus {
    /// Returns true if the stage can be skipped on resume.
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// How a stage failure affects the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageRole {
    /// Exhausting attempts aborts the run.
    LoadBearing,
    /// Exhausting attempts is recorded and the run continues.
    #[default]
    Optional,
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadBearing => write!(f, "load_bearing"),
            Self::Optional => write!(f, "optional"),
        }
    }
}

/// Final state of a stage within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    /// The stage executed and completed.
    Completed,
    /// The stage was satisfied from a completed checkpoint.
    Resumed,
    /// The stage exhausted its attempts.
    Failed,
    /// The stage is optional and not enabled for this run.
    Disabled,
    /// The run aborted before the stage was reached.
    NotRun,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Resumed => write!(f, "resumed"),
            Self::Failed => write!(f, "failed"),
            Self::Disabled => write!(f, "disabled"),
            Self::NotRun => write!(f, "not_run"),
        }
    }
}

impl StageState {
    /// Returns true if the stage produced a usable result.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Completed | Self::Resumed)
    }
}

/// Aggregate status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every required stage completed.
    Success,
    /// An optional stage failed but a usable artifact exists.
    Partial,
    /// A load-bearing stage failed or nothing usable was produced.
    Error,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Partial => write!(f, "partial"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Severity of a run event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    /// Verbose diagnostics.
    Debug,
    /// Normal lifecycle.
    #[default]
    Info,
    /// Degraded but continuing.
    Warn,
    /// Failure.
    Error,
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_status_display() {
        assert_eq!(CheckpointStatus::NotStarted.to_string(), "not_started");
        assert_eq!(CheckpointStatus::Started.to_string(), "started");
        assert_eq!(CheckpointStatus::Completed.to_string(), "completed");
        assert_eq!(CheckpointStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_checkpoint_status_resumable() {
        assert!(CheckpointStatus::Completed.is_resumable());
        assert!(!CheckpointStatus::Started.is_resumable());
        assert!(!CheckpointStatus::Failed.is_resumable());
    }

    #[test]
    fn test_stage_state_usable() {
        assert!(StageState::Completed.is_usable());
        assert!(StageState::Resumed.is_usable());
        assert!(!StageState::Failed.is_usable());
        assert!(!StageState::Disabled.is_usable());
        assert!(!StageState::NotRun.is_usable());
    }

    #[test]
    fn test_run_status_serialize() {
        let json = serde_json::to_string(&RunStatus::Partial).unwrap();
        assert_eq!(json, r#""partial""#);

        let deserialized: RunStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, RunStatus::Partial);
    }

    #[test]
    fn test_event_level_ordering() {
        assert!(EventLevel::Error > EventLevel::Warn);
        assert!(EventLevel::Warn > EventLevel::Info);
        assert_eq!(serde_json::to_string(&EventLevel::Warn).unwrap(), r#""warn""#);
    }
}

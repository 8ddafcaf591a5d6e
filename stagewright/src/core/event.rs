//! Run events appended to the event log at every lifecycle transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::EventLevel;

/// The kind of lifecycle transition an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventType {
    /// The run began.
    RunStarted,
    /// The run finished with an aggregate status.
    RunCompleted,
    /// A load-bearing stage exhausted its attempts.
    RunAborted,
    /// A stage attempt began.
    StageStarted,
    /// A stage attempt succeeded.
    StageCompleted,
    /// A stage attempt failed.
    StageFailed,
    /// A failed stage will be retried after a backoff.
    StageRetryScheduled,
    /// A stage was satisfied from its checkpoint.
    StageSkipped,
    /// An optional stage is not enabled for this run.
    StageDisabled,
}

impl fmt::Display for RunEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RunStarted => "run_started",
            Self::RunCompleted => "run_completed",
            Self::RunAborted => "run_aborted",
            Self::StageStarted => "stage_started",
            Self::StageCompleted => "stage_completed",
            Self::StageFailed => "stage_failed",
            Self::StageRetryScheduled => "stage_retry_scheduled",
            Self::StageSkipped => "stage_skipped",
            Self::StageDisabled => "stage_disabled",
        };
        f.write_str(name)
    }
}

/// An immutable record of one transition in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Unique event ID.
    pub id: Uuid,
    /// The run this event belongs to.
    pub run_id: String,
    /// The stage the event concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_key: Option<String>,
    /// The transition type.
    #[serde(rename = "type")]
    pub event_type: RunEventType,
    /// Severity.
    pub level: EventLevel,
    /// Human-readable message.
    pub message: String,
    /// Structured details.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
}

impl RunEvent {
    /// Creates a run-level event at info level.
    #[must_use]
    pub fn new(run_id: impl Into<String>, event_type: RunEventType, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id: run_id.into(),
            stage_key: None,
            event_type,
            level: EventLevel::Info,
            message: message.into(),
            metadata: serde_json::Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// Creates a stage-scoped event at info level.
    #[must_use]
    pub fn for_stage(
        run_id: impl Into<String>,
        stage_key: impl Into<String>,
        event_type: RunEventType,
        message: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(run_id, event_type, message);
        event.stage_key = Some(stage_key.into());
        event
    }

    /// Sets the level.
    #[must_use]
    pub fn with_level(mut self, level: EventLevel) -> Self {
        self.level = level;
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Gets a metadata value.
    #[must_use]
    pub fn meta(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = RunEvent::new("run-1", RunEventType::RunStarted, "Run started");
        assert_eq!(event.run_id, "run-1");
        assert!(event.stage_key.is_none());
        assert_eq!(event.level, EventLevel::Info);
        assert!(event.metadata.is_empty());
    }

    #[test]
    fn test_stage_event_with_meta() {
        let event = RunEvent::for_stage("run-1", "market", RunEventType::StageFailed, "Market failed")
            .with_level(EventLevel::Warn)
            .with_meta("attempt", serde_json::json!(2));

        assert_eq!(event.stage_key.as_deref(), Some("market"));
        assert_eq!(event.level, EventLevel::Warn);
        assert_eq!(event.meta("attempt"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn test_event_type_display_matches_serde() {
        let json = serde_json::to_string(&RunEventType::StageRetryScheduled).unwrap();
        assert_eq!(json, format!("\"{}\"", RunEventType::StageRetryScheduled));
    }

    #[test]
    fn test_event_serialization() {
        let event = RunEvent::for_stage("run-1", "s", RunEventType::StageSkipped, "skipped");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stage_skipped");

        let deserialized: RunEvent = serde_json::from_value(json).unwrap();
        assert_eq!(deserialized, event);
    }
}

//! Error types for the stagewright framework.
//!
//! Errors are split by area. Only [`PipelineError`] ever reaches the caller of
//! a run; everything else is translated into stage-level failure records or
//! swallowed by the best-effort persistence wrappers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Setup-time fatal errors returned by a pipeline run.
///
/// Ordinary stage failures never surface as a `PipelineError`; they are
/// folded into the [`RunOutcome`](crate::core::RunOutcome) instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The pipeline definition is invalid.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// The subject record for the run is missing.
    #[error("Subject record missing for run '{run_id}'")]
    MissingSubject {
        /// The run ID.
        run_id: String,
    },

    /// The run is already executing in this executor.
    #[error("Run '{run_id}' is already in progress")]
    RunInProgress {
        /// The run ID.
        run_id: String,
    },

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Error raised when a pipeline definition fails validation.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }
}

/// Errors produced by one generation call.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// The stream went silent for longer than the stall window.
    #[error("Generation stalled after {silent_ms}ms of silence ({chars} chars received)")]
    Stalled {
        /// Length of the silence that fired the watchdog.
        silent_ms: u64,
        /// Characters accumulated before the stall.
        chars: usize,
    },

    /// The call exceeded its absolute ceiling.
    #[error("Generation exceeded overall timeout of {timeout_ms}ms ({chars} chars received)")]
    OverallTimeout {
        /// The overall ceiling.
        timeout_ms: u64,
        /// Characters accumulated before the ceiling.
        chars: usize,
    },

    /// The connection failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The stream carried data that could not be understood.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The endpoint returned an error response.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status or provider error code.
        status: u16,
        /// Provider message.
        message: String,
    },

    /// A tool handler failed in a way the loop could not report back.
    #[error("Tool '{name}' failed: {reason}")]
    Tool {
        /// The tool name.
        name: String,
        /// The reason for failure.
        reason: String,
    },
}

impl GenerationError {
    /// Returns true for watchdog failures, which are retried once.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Stalled { .. } | Self::OverallTimeout { .. })
    }

    /// Converts to a dictionary representation for event metadata.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();

        let kind = match self {
            Self::Stalled { chars, .. } | Self::OverallTimeout { chars, .. } => {
                map.insert("chars".to_string(), serde_json::json!(chars));
                if matches!(self, Self::Stalled { .. }) {
                    "stalled"
                } else {
                    "overall_timeout"
                }
            }
            Self::Transport(_) => "transport",
            Self::Protocol(_) => "protocol",
            Self::Api { status, .. } => {
                map.insert("status".to_string(), serde_json::json!(status));
                "api"
            }
            Self::Tool { name, .. } => {
                map.insert("tool".to_string(), serde_json::json!(name));
                "tool"
            }
        };

        map.insert("type".to_string(), serde_json::json!(kind));
        map.insert("transient".to_string(), serde_json::json!(self.is_transient()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Raised when every recovery strategy failed on a response.
#[derive(Debug, Clone, Error)]
pub enum RecoveryError {
    /// No strategy produced a structured value.
    #[error("Invalid structured output: could not parse after all attempts (preview: {preview:?})")]
    Unparseable {
        /// The first characters of the text, for diagnostics.
        preview: String,
    },

    /// A recovered value lacks required fields.
    #[error("Structured output missing required fields: {}", missing.join(", "))]
    MissingFields {
        /// The missing field names.
        missing: Vec<String>,
    },

    /// A recovered value did not match the requested type.
    #[error("Structured output has unexpected shape: {0}")]
    Shape(String),

    /// A salvage field name could not be turned into a pattern.
    #[error("Invalid salvage field pattern: {0}")]
    Pattern(String),
}

/// A generation call followed by structured recovery failed.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// The call itself failed.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// The call succeeded but its text could not be recovered.
    #[error(transparent)]
    Recovery(#[from] RecoveryError),
}

/// Errors from a checkpoint backend.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The backend is unreachable or refused the operation.
    #[error("Checkpoint store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be (de)serialized.
    #[error("Checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("Checkpoint IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from an event log backend.
#[derive(Debug, Error)]
pub enum EventLogError {
    /// The backend is unreachable or refused the append.
    #[error("Event log unavailable: {0}")]
    Unavailable(String),

    /// The event could not be serialized.
    #[error("Event serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("Event log IO error: {0}")]
    Io(#[from] std::io::Error),
}

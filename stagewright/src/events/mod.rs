//! Run event log.
//!
//! Every lifecycle transition of a run is appended as a [`RunEvent`]. Logs
//! are write-only from the pipeline's point of view, and
//! [`EventRecorder`] swallows append failures so observability never
//! aborts a run.

mod jsonl;
mod sink;

pub use jsonl::JsonlEventLog;
pub use sink::{CollectingEventLog, EventLog, LoggingEventLog, NoOpEventLog};

use std::sync::Arc;
use tracing::warn;

use crate::core::RunEvent;

/// Fans events out to every configured log, ignoring failures.
#[derive(Clone, Default)]
pub struct EventRecorder {
    logs: Vec<Arc<dyn EventLog>>,
}

impl std::fmt::Debug for EventRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRecorder").field("logs", &self.logs.len()).finish()
    }
}

impl EventRecorder {
    /// Creates a recorder writing to one log.
    #[must_use]
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self { logs: vec![log] }
    }

    /// Creates a recorder with no logs.
    #[must_use]
    pub fn noop() -> Self {
        Self::default()
    }

    /// Adds another log.
    #[must_use]
    pub fn with_log(mut self, log: Arc<dyn EventLog>) -> Self {
        self.logs.push(log);
        self
    }

    /// Appends an event to every log.
    pub async fn record(&self, event: RunEvent) {
        for log in &self.logs {
            if let Err(e) = log.append(&event).await {
                warn!(
                    run_id = %event.run_id,
                    event_type = %event.event_type,
                    error = %e,
                    "Failed to append run event"
                );
            }
        }
    }
}

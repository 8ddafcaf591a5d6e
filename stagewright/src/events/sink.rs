//! Event log trait and in-process implementations.

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::core::{EventLevel, RunEvent, RunEventType};
use crate::errors::EventLogError;

/// Append-only destination for run events.
///
/// The pipeline never reads events back; they are consumed externally.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends one event.
    async fn append(&self, event: &RunEvent) -> Result<(), EventLogError>;
}

/// An event log that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventLog;

#[async_trait]
impl EventLog for NoOpEventLog {
    async fn append(&self, _event: &RunEvent) -> Result<(), EventLogError> {
        Ok(())
    }
}

/// Mirrors run events into `tracing` at each event's own level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventLog;

impl LoggingEventLog {
    /// Creates a logging event log.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventLog for LoggingEventLog {
    async fn append(&self, event: &RunEvent) -> Result<(), EventLogError> {
        let stage = event.stage_key.as_deref().unwrap_or("-");
        let metadata = serde_json::Value::Object(event.metadata.clone());
        match event.level {
            EventLevel::Debug => debug!(
                run_id = %event.run_id, stage, event_type = %event.event_type, metadata = %metadata,
                "{}", event.message
            ),
            EventLevel::Info => info!(
                run_id = %event.run_id, stage, event_type = %event.event_type, metadata = %metadata,
                "{}", event.message
            ),
            EventLevel::Warn => warn!(
                run_id = %event.run_id, stage, event_type = %event.event_type, metadata = %metadata,
                "{}", event.message
            ),
            EventLevel::Error => error!(
                run_id = %event.run_id, stage, event_type = %event.event_type, metadata = %metadata,
                "{}", event.message
            ),
        }
        Ok(())
    }
}

/// Collects events in memory, for tests and dashboards in the same process.
#[derive(Debug, Default)]
pub struct CollectingEventLog {
    events: parking_lot::RwLock<Vec<RunEvent>>,
}

impl CollectingEventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events of one type.
    #[must_use]
    pub fn events_of_type(&self, event_type: RunEventType) -> Vec<RunEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Returns events for one stage, in append order.
    #[must_use]
    pub fn events_for_stage(&self, stage_key: &str) -> Vec<RunEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.stage_key.as_deref() == Some(stage_key))
            .cloned()
            .collect()
    }

    /// Returns the sequence of event types.
    #[must_use]
    pub fn types(&self) -> Vec<RunEventType> {
        self.events.read().iter().map(|e| e.event_type).collect()
    }
}

#[async_trait]
impl EventLog for CollectingEventLog {
    async fn append(&self, event: &RunEvent) -> Result<(), EventLogError> {
        self.events.write().push(event.clone());
        Ok(())
    }
}

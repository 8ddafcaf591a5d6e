//! Core domain model types for stagewright.
//!
//! This module contains the records every other layer exchanges:
//! - Checkpoint, stage, run and event status enums
//! - The persisted checkpoint record
//! - Run events
//! - Per-stage reports and the aggregate run outcome

mod checkpoint;
mod event;
mod outcome;
mod status;

pub use checkpoint::Checkpoint;
pub use event::{RunEvent, RunEventType};
pub use outcome::{aggregate_status, digest_value, AttemptOutcome, AttemptRecord, RunOutcome, StageReport};
pub use status::{CheckpointStatus, EventLevel, RunStatus, StageRole, StageState};

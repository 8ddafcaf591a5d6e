//! Testing utilities for stagewright pipelines.
//!
//! This module provides:
//! - A scripted generation backend with per-event delays and hangs
//! - Stage work that fails a fixed number of times
//! - An injectable clock that records backoff waits
//! - Assertions over run outcomes and event sequences

mod assertions;
mod mocks;
mod scripted;

pub use assertions::{assert_attempts, assert_event_types, assert_run_status, assert_stage_state};
pub use mocks::{FlakyWork, RecordingSleeper};
pub use scripted::{ScriptedBackend, ScriptedStream};

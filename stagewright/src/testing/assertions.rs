//! Test assertions for run outcomes and event streams.

use crate::core::{RunEvent, RunEventType, RunOutcome, RunStatus, StageState};

/// Asserts the run's aggregate status.
pub fn assert_run_status(outcome: &RunOutcome, expected: RunStatus) {
    assert_eq!(
        outcome.status, expected,
        "Expected run status {expected}, got {} (errors: {:?})",
        outcome.status, outcome.errors
    );
}

/// Asserts a stage's final state.
pub fn assert_stage_state(outcome: &RunOutcome, key: &str, expected: StageState) {
    let Some(stage) = outcome.stage(key) else {
        panic!("Stage '{key}' not in outcome");
    };
    assert_eq!(
        stage.state, expected,
        "Expected stage '{key}' to be {expected}, got {} (error: {:?})",
        stage.state, stage.error
    );
}

/// Asserts the attempt numbers a stage recorded in this run.
pub fn assert_attempts(outcome: &RunOutcome, key: &str, expected: &[u32]) {
    let Some(stage) = outcome.stage(key) else {
        panic!("Stage '{key}' not in outcome");
    };
    assert_eq!(stage.attempt_numbers(), expected, "Unexpected attempts for stage '{key}'");
}

/// Asserts the exact sequence of event types.
pub fn assert_event_types(events: &[RunEvent], expected: &[RunEventType]) {
    let actual: Vec<RunEventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(actual, expected, "Unexpected event sequence");
}

//! Linear stage executor with checkpointed resume.
//!
//! Per stage: consult the checkpoint, skip or execute, retry with backoff,
//! write the outcome back and emit an event at every transition. Stages run
//! strictly in declared order and a stage's retries are sequential.

use chrono::Utc;
use dashmap::DashSet;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::builder::Pipeline;
use super::context::RunContext;
use super::retry::{Sleeper, TokioSleeper};
use super::stage::StageDescriptor;
use crate::checkpoint::{CheckpointStore, Checkpoints};
use crate::config::{ModelSelection, PipelineConfig};
use crate::core::{
    aggregate_status, digest_value, AttemptOutcome, AttemptRecord, EventLevel, RunEvent, RunEventType, RunOutcome,
    RunStatus, StageReport, StageState,
};
use crate::errors::PipelineError;
use crate::events::{EventLog, EventRecorder};

/// Input to one run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Run ID; checkpoints are keyed by it.
    pub run_id: String,
    /// The record being analyzed.
    pub subject: Option<Value>,
    /// Model for this run, overriding the config.
    pub model: Option<ModelSelection>,
}

impl RunRequest {
    /// Creates a request without a subject.
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            subject: None,
            model: None,
        }
    }

    /// Sets the subject record.
    #[must_use]
    pub fn with_subject(mut self, subject: Value) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Overrides the model for this run only.
    #[must_use]
    pub fn with_model(mut self, model: ModelSelection) -> Self {
        self.model = Some(model);
        self
    }
}

/// Releases a run ID when the run ends, however it ends.
struct ActiveRun<'a> {
    runs: &'a DashSet<String>,
    run_id: String,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.runs.remove(&self.run_id);
    }
}

/// Drives pipelines against shared attempt and backoff settings.
pub struct PipelineExecutor {
    config: PipelineConfig,
    checkpoints: Checkpoints,
    events: EventRecorder,
    sleeper: Arc<dyn Sleeper>,
    active_runs: DashSet<String>,
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("config", &self.config)
            .field("checkpoints", &self.checkpoints)
            .field("active_runs", &self.active_runs.len())
            .finish_non_exhaustive()
    }
}

impl PipelineExecutor {
    /// Creates an executor with no checkpoint store and no event logs.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            checkpoints: Checkpoints::disabled(),
            events: EventRecorder::noop(),
            sleeper: Arc::new(TokioSleeper),
            active_runs: DashSet::new(),
        }
    }

    /// Persists checkpoints to a store.
    #[must_use]
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Checkpoints::new(store);
        self
    }

    /// Appends run events to a log. May be called more than once.
    #[must_use]
    pub fn with_event_log(mut self, log: Arc<dyn EventLog>) -> Self {
        self.events = self.events.with_log(log);
        self
    }

    /// Replaces the clock used for backoff waits.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Returns the config.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns the checkpoint facade.
    pub fn checkpoints(&self) -> &Checkpoints {
        &self.checkpoints
    }

    /// Returns true if a run is executing.
    pub fn is_running(&self, run_id: &str) -> bool {
        self.active_runs.contains(run_id)
    }

    /// Executes every stage of `pipeline` in order.
    ///
    /// Ordinary stage failures are reported in the outcome, never as errors.
    ///
    /// # Errors
    ///
    /// Returns an error only for setup failures: a missing subject or a run ID
    /// already executing in this executor.
    pub async fn run(&self, pipeline: &Pipeline, request: RunRequest) -> Result<RunOutcome, PipelineError> {
        let RunRequest { run_id, subject, model } = request;
        let subject = subject.ok_or_else(|| PipelineError::MissingSubject { run_id: run_id.clone() })?;
        let _active = self.claim(&run_id)?;

        let started_at = Utc::now();
        let clock = Instant::now();
        let model = match model {
            Some(selection) => self.config.effective_model_for(&selection),
            None => self.config.effective_model(),
        };
        let ctx = RunContext::with_model(&run_id, subject, self.config.clone(), model);

        info!(
            run_id = %run_id,
            pipeline = pipeline.name(),
            stages = pipeline.len(),
            model = %ctx.model().model,
            "Starting run"
        );
        self.events
            .record(
                RunEvent::new(&run_id, RunEventType::RunStarted, format!("Run started ({} stages)", pipeline.len()))
                    .with_meta("pipeline", json!(pipeline.name()))
                    .with_meta("model", json!(ctx.model().model)),
            )
            .await;

        let existing = self.checkpoints.load_run(&run_id).await;
        if !existing.is_empty() {
            debug!(run_id = %run_id, rows = existing.len(), "Loaded checkpoints");
        }

        let mut reports = Vec::with_capacity(pipeline.len());
        let mut errors = Vec::new();
        let mut missing = Vec::new();
        let mut aborted_by: Option<String> = None;

        for stage in pipeline.stages() {
            if aborted_by.is_some() {
                reports.push(StageReport::new(&stage.key, &stage.label, stage.role, StageState::NotRun));
                continue;
            }

            if !stage.is_load_bearing() && !self.config.is_optional_enabled(&stage.key) {
                self.events
                    .record(RunEvent::for_stage(
                        &run_id,
                        &stage.key,
                        RunEventType::StageDisabled,
                        format!("{} disabled for this run", stage.label),
                    ))
                    .await;
                reports.push(StageReport::new(&stage.key, &stage.label, stage.role, StageState::Disabled));
                continue;
            }

            if let Some(report) = self.resume(&ctx, stage, existing.get(&stage.key)).await {
                reports.push(report);
                continue;
            }

            let report = self.execute_stage(&ctx, stage).await;
            if report.state == StageState::Failed {
                let message = format!("{}: {}", stage.label, report.error.as_deref().unwrap_or("failed"));
                if stage.is_load_bearing() {
                    error!(run_id = %run_id, stage = %stage.key, "Load-bearing stage exhausted its attempts");
                    aborted_by = Some(stage.key.clone());
                } else {
                    missing.push(message.clone());
                }
                errors.push(message);
            }
            reports.push(report);
        }

        let status = aggregate_status(&reports, pipeline.artifact_stage(), aborted_by.is_some());
        let artifact_digest = pipeline
            .artifact_stage()
            .and_then(|key| reports.iter().find(|r| r.key == key))
            .and_then(|r| r.result.as_ref())
            .map(digest_value);
        let duration_ms = duration_ms(clock.elapsed());

        let event = match &aborted_by {
            Some(key) => RunEvent::new(&run_id, RunEventType::RunAborted, format!("Run aborted by stage '{key}'"))
                .with_level(EventLevel::Error)
                .with_meta("stage", json!(key))
                .with_meta("error", json!(errors.last())),
            None => RunEvent::new(&run_id, RunEventType::RunCompleted, format!("Run finished with status {status}"))
                .with_level(match status {
                    RunStatus::Success => EventLevel::Info,
                    RunStatus::Partial => EventLevel::Warn,
                    RunStatus::Error => EventLevel::Error,
                })
                .with_meta("status", json!(status))
                .with_meta("errors", json!(errors.len())),
        };
        self.events.record(event.with_meta("duration_ms", json!(duration_ms))).await;

        info!(run_id = %run_id, status = %status, errors = errors.len(), duration_ms, "Run finished");

        Ok(RunOutcome {
            run_id,
            pipeline: pipeline.name().to_string(),
            status,
            stages: reports,
            errors,
            missing,
            aborted_by,
            artifact_digest,
            started_at,
            finished_at: Utc::now(),
            duration_ms,
        })
    }

    fn claim(&self, run_id: &str) -> Result<ActiveRun<'_>, PipelineError> {
        if !self.active_runs.insert(run_id.to_string()) {
            return Err(PipelineError::RunInProgress {
                run_id: run_id.to_string(),
            });
        }
        Ok(ActiveRun {
            runs: &self.active_runs,
            run_id: run_id.to_string(),
        })
    }

    async fn resume(
        &self,
        ctx: &RunContext,
        stage: &StageDescriptor,
        checkpoint: Option<&crate::core::Checkpoint>,
    ) -> Option<StageReport> {
        let checkpoint = checkpoint.filter(|cp| cp.status.is_resumable())?;
        let Some(result) = stage.work().restore(checkpoint.payload.clone()) else {
            info!(run_id = ctx.run_id(), stage = %stage.key, "Checkpoint payload not restorable, re-running stage");
            return None;
        };

        ctx.insert_result(&stage.key, result.clone());
        self.events
            .record(
                RunEvent::for_stage(
                    ctx.run_id(),
                    &stage.key,
                    RunEventType::StageSkipped,
                    format!("{} restored from checkpoint", stage.label),
                )
                .with_meta("attempts", json!(checkpoint.attempts)),
            )
            .await;
        debug!(run_id = ctx.run_id(), stage = %stage.key, "Stage restored from checkpoint");

        let mut report = StageReport::new(&stage.key, &stage.label, stage.role, StageState::Resumed);
        report.result = Some(result);
        Some(report)
    }

    async fn execute_stage(&self, ctx: &RunContext, stage: &StageDescriptor) -> StageReport {
        let run_id = ctx.run_id();
        let max_attempts = self.config.max_attempts.max(1);
        let ceiling = stage.timeout.unwrap_or_else(|| self.config.default_stage_timeout());
        let failed_level = if stage.is_load_bearing() { EventLevel::Error } else { EventLevel::Warn };

        let mut report = StageReport::new(&stage.key, &stage.label, stage.role, StageState::Failed);
        let stage_clock = Instant::now();

        for attempt in 1..=max_attempts {
            self.checkpoints.started(run_id, &stage.key, attempt).await;
            self.events
                .record(
                    RunEvent::for_stage(
                        run_id,
                        &stage.key,
                        RunEventType::StageStarted,
                        format!("{} started (attempt {attempt}/{max_attempts})", stage.label),
                    )
                    .with_meta("attempt", json!(attempt)),
                )
                .await;

            let started_at = Utc::now();
            let clock = Instant::now();
            let result = tokio::time::timeout(ceiling, stage.work().run(ctx.clone())).await;
            let elapsed = duration_ms(clock.elapsed());

            let (outcome, message) = match result {
                Ok(Ok(value)) => {
                    let payload = stage.work().checkpoint_payload(&value);
                    self.checkpoints.completed(run_id, &stage.key, payload, elapsed).await;
                    self.events
                        .record(
                            RunEvent::for_stage(
                                run_id,
                                &stage.key,
                                RunEventType::StageCompleted,
                                format!("{} completed", stage.label),
                            )
                            .with_meta("attempt", json!(attempt))
                            .with_meta("duration_ms", json!(elapsed)),
                        )
                        .await;
                    info!(run_id, stage = %stage.key, attempt, duration_ms = elapsed, "Stage completed");

                    ctx.insert_result(&stage.key, value.clone());
                    report.attempts.push(AttemptRecord {
                        number: attempt,
                        started_at,
                        ended_at: Utc::now(),
                        outcome: AttemptOutcome::Succeeded,
                        error: None,
                    });
                    report.state = StageState::Completed;
                    report.result = Some(value);
                    report.error = None;
                    report.duration_ms = duration_ms(stage_clock.elapsed());
                    return report;
                }
                Ok(Err(e)) => (AttemptOutcome::Failed, format!("{e:#}")),
                Err(_) => (
                    AttemptOutcome::TimedOut,
                    format!("{} timed out after {}ms", stage.label, duration_ms(ceiling)),
                ),
            };

            self.checkpoints.failed(run_id, &stage.key, &message, elapsed).await;
            self.events
                .record(
                    RunEvent::for_stage(
                        run_id,
                        &stage.key,
                        RunEventType::StageFailed,
                        format!("{} failed (attempt {attempt}/{max_attempts}): {message}", stage.label),
                    )
                    .with_level(failed_level)
                    .with_meta("attempt", json!(attempt))
                    .with_meta("max_attempts", json!(max_attempts))
                    .with_meta("error", json!(message))
                    .with_meta("duration_ms", json!(elapsed)),
                )
                .await;
            warn!(run_id, stage = %stage.key, attempt, max_attempts, error = %message, "Stage attempt failed");

            report.attempts.push(AttemptRecord {
                number: attempt,
                started_at,
                ended_at: Utc::now(),
                outcome,
                error: Some(message.clone()),
            });
            report.error = Some(message.clone());

            if attempt < max_attempts {
                let delay = self.config.backoff.delay(self.config.backoff_base_ms, attempt);
                let delay_ms = duration_ms(delay);
                self.events
                    .record(
                        RunEvent::for_stage(
                            run_id,
                            &stage.key,
                            RunEventType::StageRetryScheduled,
                            format!("{} retrying in {delay_ms}ms", stage.label),
                        )
                        .with_meta("attempt", json!(attempt))
                        .with_meta("next_attempt", json!(attempt + 1))
                        .with_meta("backoff_ms", json!(delay_ms))
                        .with_meta("error", json!(message)),
                    )
                    .await;
                info!(run_id, stage = %stage.key, attempt, delay_ms, "Retrying stage after backoff");
                self.sleeper.sleep(delay).await;
            }
        }

        report.duration_ms = duration_ms(stage_clock.elapsed());
        report
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

//! # Stagewright
//!
//! Checkpointed stage pipelines over slow, streaming text-generation calls.
//!
//! Stagewright drives a fixed, linear sequence of named stages to build one
//! analytical artifact, with support for:
//!
//! - **Resumable runs**: completed stages are checkpointed and never re-run
//! - **Retry with backoff**: per-stage attempt budgets with linear backoff
//! - **Supervised generation calls**: stall and overall watchdogs with partial salvage
//! - **Structured output recovery**: a cascade of JSON repair strategies
//! - **Run events**: an append-only lifecycle stream for dashboards
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagewright::prelude::*;
//!
//! let pipeline = PipelineBuilder::new("occupation-report")
//!     .stage(StageDescriptor::load_bearing("collect", "Collect data", CollectStage::new()))
//!     .stage(StageDescriptor::optional("score", "Score fit", ScoreStage::new(supervisor)))
//!     .artifact_stage("score")
//!     .build()?;
//!
//! let executor = PipelineExecutor::new(PipelineConfig::from_env())
//!     .with_checkpoint_store(Arc::new(InMemoryCheckpointStore::new()))
//!     .with_event_log(Arc::new(LoggingEventLog::new()));
//!
//! let outcome = executor
//!     .run(&pipeline, RunRequest::new(run_id).with_subject(subject))
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod checkpoint;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod generation;
pub mod observability;
pub mod pipeline;
pub mod recovery;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::checkpoint::{
        build_run_key, CheckpointStore, Checkpoints, InMemoryCheckpointStore, JsonFileCheckpointStore,
    };
    pub use crate::config::{GenerationConfig, ModelSelection, PipelineConfig, TestModeProfile};
    pub use crate::core::{
        Checkpoint, CheckpointStatus, RunEvent, RunEventType, RunOutcome, RunStatus, StageReport, StageRole,
        StageState,
    };
    pub use crate::errors::{CallError, GenerationError, PipelineError, RecoveryError};
    pub use crate::events::{CollectingEventLog, EventLog, JsonlEventLog, LoggingEventLog, NoOpEventLog};
    pub use crate::generation::{
        GenerationBackend, GenerationRequest, GenerationResponse, GenerationSupervisor, ToolHandler, ToolSpec,
    };
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{
        BackoffStrategy, FnStageWork, Pipeline, PipelineBuilder, PipelineExecutor, RunContext, RunRequest,
        StageDescriptor, StageWork,
    };
    pub use crate::recovery::{recover, recover_as, Recovered, Recoverer, Score};
}

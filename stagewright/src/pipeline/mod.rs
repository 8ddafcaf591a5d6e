//! Pipeline building and execution.
//!
//! This module provides:
//! - Stage work and descriptors
//! - Pipeline builder with validation
//! - The checkpointed, retrying stage executor
//! - Backoff strategies and an injectable clock
//! - Per-run context with ordered batch helpers

mod builder;
mod context;
mod executor;
mod retry;
mod stage;


pub use builder::{Pipeline, PipelineBuilder};
pub use context::{ordered_batch, RunContext};
pub use executor::{PipelineExecutor, RunRequest};
pub use retry::{BackoffStrategy, Sleeper, TokioSleeper};
pub use stage::{FnStageWork, StageDescriptor, StageWork};

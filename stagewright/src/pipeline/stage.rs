//! Stage work and stage descriptors.
//!
//! A stage body implements only what to compute. Attempts, backoff,
//! checkpointing and events are the executor's job.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::context::RunContext;
use crate::core::StageRole;

/// The work function of a stage.
#[async_trait]
pub trait StageWork: Send + Sync {
    /// Computes the stage result.
    ///
    /// Results of earlier stages are available through [`RunContext::result`].
    async fn run(&self, ctx: RunContext) -> anyhow::Result<Value>;

    /// Shapes the payload persisted when the stage completes.
    fn checkpoint_payload(&self, result: &Value) -> Value {
        result.clone()
    }

    /// Rebuilds the stage result from a completed checkpoint payload.
    ///
    /// Returning `None` discards the checkpoint and runs the stage again.
    fn restore(&self, payload: Value) -> Option<Value> {
        Some(payload)
    }
}

/// Adapts an async closure into [`StageWork`].
pub struct FnStageWork<F> {
    func: F,
}

impl<F> FnStageWork<F> {
    /// Wraps a closure.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Debug for FnStageWork<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStageWork").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> StageWork for FnStageWork<F>
where
    F: Fn(RunContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn run(&self, ctx: RunContext) -> anyhow::Result<Value> {
        (self.func)(ctx).await
    }
}

#[async_trait]
impl<T: StageWork + ?Sized> StageWork for Arc<T> {
    async fn run(&self, ctx: RunContext) -> anyhow::Result<Value> {
        (**self).run(ctx).await
    }

    fn checkpoint_payload(&self, result: &Value) -> Value {
        (**self).checkpoint_payload(result)
    }

    fn restore(&self, payload: Value) -> Option<Value> {
        (**self).restore(payload)
    }
}

/// One named stage with a fixed position in run order.
#[derive(Clone)]
pub struct StageDescriptor {
    /// Unique key, used for checkpoints and result lookup.
    pub key: String,
    /// Human-readable label, used in messages.
    pub label: String,
    /// Whether exhausting attempts aborts the run.
    pub role: StageRole,
    /// Hard ceiling per attempt; the pipeline default applies when unset.
    pub timeout: Option<Duration>,
    work: Arc<dyn StageWork>,
}

impl StageDescriptor {
    /// Creates a stage whose failure aborts the run.
    pub fn load_bearing(key: impl Into<String>, label: impl Into<String>, work: impl StageWork + 'static) -> Self {
        Self::with_role(key, label, StageRole::LoadBearing, Arc::new(work))
    }

    /// Creates a stage whose failure is recorded and skipped past.
    pub fn optional(key: impl Into<String>, label: impl Into<String>, work: impl StageWork + 'static) -> Self {
        Self::with_role(key, label, StageRole::Optional, Arc::new(work))
    }

    /// Creates a stage from shared work.
    pub fn with_role(
        key: impl Into<String>,
        label: impl Into<String>,
        role: StageRole,
        work: Arc<dyn StageWork>,
    ) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            role,
            timeout: None,
            work,
        }
    }

    /// Sets the per-attempt hard ceiling.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the stage work.
    pub fn work(&self) -> &dyn StageWork {
        self.work.as_ref()
    }

    /// Returns true if exhausting attempts aborts the run.
    pub fn is_load_bearing(&self) -> bool {
        self.role == StageRole::LoadBearing
    }
}

impl Debug for StageDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("key", &self.key)
            .field("label", &self.label)
            .field("role", &self.role)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

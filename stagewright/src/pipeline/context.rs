//! Per-run context shared by every stage of a run.

use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::config::{ModelSelection, PipelineConfig};

#[derive(Debug)]
struct Inner {
    run_id: String,
    subject: Value,
    model: ModelSelection,
    config: PipelineConfig,
    results: RwLock<HashMap<String, Value>>,
}

/// The context a stage sees: run identity, subject, the run's model and the
/// results of stages that have already produced one.
///
/// Cloning is cheap; clones share the same result map.
#[derive(Debug, Clone)]
pub struct RunContext {
    inner: Arc<Inner>,
}

impl RunContext {
    /// Creates a context with the model the config selects.
    pub fn new(run_id: impl Into<String>, subject: Value, config: PipelineConfig) -> Self {
        let model = config.effective_model();
        Self::with_model(run_id, subject, config, model)
    }

    /// Creates a context with an explicit model for this run.
    pub fn with_model(run_id: impl Into<String>, subject: Value, config: PipelineConfig, model: ModelSelection) -> Self {
        Self {
            inner: Arc::new(Inner {
                run_id: run_id.into(),
                subject,
                model,
                config,
                results: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Returns the run ID.
    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    /// Returns the subject record.
    pub fn subject(&self) -> &Value {
        &self.inner.subject
    }

    /// Returns the model every call in this run should use.
    pub fn model(&self) -> &ModelSelection {
        &self.inner.model
    }

    /// Returns the pipeline config.
    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Returns an earlier stage's result.
    pub fn result(&self, stage_key: &str) -> Option<Value> {
        self.inner.results.read().get(stage_key).cloned()
    }

    /// Returns true if an earlier stage produced a result.
    pub fn has_result(&self, stage_key: &str) -> bool {
        self.inner.results.read().contains_key(stage_key)
    }

    /// Returns the keys of stages with results.
    pub fn completed_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.results.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub(crate) fn insert_result(&self, stage_key: &str, value: Value) {
        self.inner.results.write().insert(stage_key.to_string(), value);
    }

    /// Runs `f` over `items` with the configured concurrency window.
    ///
    /// Outputs are in input order regardless of completion order.
    pub async fn batch<T, R, F, Fut>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = R>,
    {
        ordered_batch(items, self.inner.config.batch_concurrency, f).await
    }
}

/// Runs `f` over `items` with at most `window` in flight, returning outputs
/// in input order.
pub async fn ordered_batch<T, R, F, Fut>(items: Vec<T>, window: usize, f: F) -> Vec<R>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = R>,
{
    stream::iter(items).map(f).buffered(window.max(1)).collect().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TestModeProfile;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_results_shared_between_clones() {
        let ctx = RunContext::new("r", json!({}), PipelineConfig::default());
        let clone = ctx.clone();
        ctx.insert_result("collect", json!([1, 2]));
        assert_eq!(clone.result("collect"), Some(json!([1, 2])));
        assert!(clone.has_result("collect"));
        assert_eq!(clone.completed_keys(), vec!["collect".to_string()]);
    }

    #[test]
    fn test_model_follows_test_mode() {
        let config = PipelineConfig::default().with_test_mode(TestModeProfile::default());
        let ctx = RunContext::new("r", json!({}), config);
        assert_eq!(ctx.model().model, crate::config::DEFAULT_TEST_MODEL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_respects_window() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let out = ordered_batch((0..12).collect(), 3, |i: u64| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10 * (12 - i))).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                i * 2
            }
        })
        .await;

        assert_eq!(out, (0..12).map(|i| i * 2).collect::<Vec<_>>());
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_batch_zero_window_still_runs() {
        let out = ordered_batch(vec!["a", "b"], 0, |s: &str| async move { s.to_uppercase() }).await;
        assert_eq!(out, vec!["A".to_string(), "B".to_string()]);
    }
}

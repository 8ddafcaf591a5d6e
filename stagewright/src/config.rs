//! Configuration surface for pipelines and generation calls.
//!
//! Every struct deserializes with per-field defaults, so a partial JSON or
//! environment-derived configuration fills in the rest.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::pipeline::BackoffStrategy;

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
/// Default reduced-cost model identifier used in test mode.
pub const DEFAULT_TEST_MODEL: &str = "claude-3-5-haiku-20241022";

/// Which model a run uses and how much output it may request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    /// Model identifier passed to the generation endpoint.
    pub model: String,
    /// Output-length ceiling.
    pub max_tokens: u32,
}

impl Default for ModelSelection {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 8000,
        }
    }
}

impl ModelSelection {
    /// Creates a selection.
    #[must_use]
    pub fn new(model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            max_tokens,
        }
    }
}

/// Reduced-cost profile substituted for the configured model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestModeProfile {
    /// Cheaper model identifier.
    #[serde(default = "default_test_model")]
    pub model: String,
    /// Output ceiling used in test mode.
    #[serde(default = "default_test_max_tokens")]
    pub max_tokens: u32,
    /// Requests above this ceiling are lowered to it.
    #[serde(default = "default_test_max_tokens_cap")]
    pub max_tokens_cap: u32,
}

fn default_test_model() -> String {
    DEFAULT_TEST_MODEL.to_string()
}

fn default_test_max_tokens() -> u32 {
    4000
}

fn default_test_max_tokens_cap() -> u32 {
    8192
}

impl Default for TestModeProfile {
    fn default() -> Self {
        Self {
            model: default_test_model(),
            max_tokens: default_test_max_tokens(),
            max_tokens_cap: default_test_max_tokens_cap(),
        }
    }
}

impl TestModeProfile {
    /// Lowers a requested output ceiling to the profile cap.
    #[must_use]
    pub fn cap(&self, requested: u32) -> u32 {
        if requested > self.max_tokens_cap {
            info!(requested, cap = self.max_tokens_cap, "Capping max_tokens in test mode");
            self.max_tokens_cap
        } else {
            requested
        }
    }

    /// Output ceiling for a request in test mode.
    ///
    /// An unset request (`0`) takes the profile ceiling. Anything else is
    /// lowered to the profile ceiling and then to the cap.
    #[must_use]
    pub fn ceiling(&self, requested: u32) -> u32 {
        let wanted = if requested == 0 {
            self.max_tokens
        } else {
            self.max_tokens.min(requested)
        };
        self.cap(wanted)
    }
}

/// Per-run pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Attempts per stage, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base interval between attempts.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// How the interval grows with the attempt number.
    #[serde(default = "default_backoff")]
    pub backoff: BackoffStrategy,
    /// Hard ceiling for stages that do not set their own.
    #[serde(default = "default_stage_timeout_ms")]
    pub default_stage_timeout_ms: u64,
    /// Concurrency window for batch operations inside a stage.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
    /// Model selection.
    #[serde(default)]
    pub model: ModelSelection,
    /// Reduced-cost profile, if test mode is on.
    #[serde(default)]
    pub test_mode: Option<TestModeProfile>,
    /// Optional stages enabled for the run. `None` enables all of them.
    #[serde(default)]
    pub enabled_optional_stages: Option<Vec<String>>,
}

fn default_max_attempts() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    2000
}

fn default_backoff() -> BackoffStrategy {
    BackoffStrategy::Linear
}

fn default_stage_timeout_ms() -> u64 {
    15 * 60 * 1000
}

fn default_batch_concurrency() -> usize {
    5
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff: default_backoff(),
            default_stage_timeout_ms: default_stage_timeout_ms(),
            batch_concurrency: default_batch_concurrency(),
            model: ModelSelection::default(),
            test_mode: None,
            enabled_optional_stages: None,
        }
    }
}

impl PipelineConfig {
    /// Creates a config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the attempts per stage (at least 1).
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the backoff base.
    #[must_use]
    pub fn with_backoff_base_ms(mut self, base_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the default stage ceiling.
    #[must_use]
    pub fn with_default_stage_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_stage_timeout_ms = timeout_ms;
        self
    }

    /// Sets the batch concurrency window (at least 1).
    #[must_use]
    pub fn with_batch_concurrency(mut self, window: usize) -> Self {
        self.batch_concurrency = window.max(1);
        self
    }

    /// Sets the model selection.
    #[must_use]
    pub fn with_model(mut self, model: ModelSelection) -> Self {
        self.model = model;
        self
    }

    /// Turns on test mode with the given profile.
    #[must_use]
    pub fn with_test_mode(mut self, profile: TestModeProfile) -> Self {
        self.test_mode = Some(profile);
        self
    }

    /// Restricts which optional stages run.
    #[must_use]
    pub fn with_enabled_optional_stages<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled_optional_stages = Some(stages.into_iter().map(Into::into).collect());
        self
    }

    /// Returns the default stage ceiling as a duration.
    #[must_use]
    pub fn default_stage_timeout(&self) -> Duration {
        Duration::from_millis(self.default_stage_timeout_ms)
    }

    /// Returns true if an optional stage is enabled for the run.
    #[must_use]
    pub fn is_optional_enabled(&self, key: &str) -> bool {
        self.enabled_optional_stages
            .as_ref()
            .map_or(true, |enabled| enabled.iter().any(|k| k == key))
    }

    /// Returns the model selection calls should use, with test mode applied.
    #[must_use]
    pub fn effective_model(&self) -> ModelSelection {
        self.effective_model_for(&self.model)
    }

    /// Applies test mode to an explicit selection.
    #[must_use]
    pub fn effective_model_for(&self, selection: &ModelSelection) -> ModelSelection {
        match &self.test_mode {
            Some(profile) => ModelSelection {
                model: profile.model.clone(),
                max_tokens: profile.ceiling(selection.max_tokens),
            },
            None => selection.clone(),
        }
    }

    /// Loads from `STAGEWRIGHT_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads from an arbitrary key lookup. Unparseable values keep their defaults.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(attempts) = parse_var::<u32>(&lookup, "STAGEWRIGHT_MAX_ATTEMPTS") {
            config.max_attempts = attempts.max(1);
        }
        if let Some(base) = parse_var::<i64>(&lookup, "STAGEWRIGHT_RETRY_BACKOFF_MS") {
            config.backoff_base_ms = u64::try_from(base).unwrap_or(0);
        }
        if let Some(model) = lookup("STAGEWRIGHT_MODEL").filter(|m| !m.trim().is_empty()) {
            config.model.model = model.trim().to_string();
        }

        let test_mode = lookup("STAGEWRIGHT_TEST_MODE")
            .is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"));
        if test_mode {
            let mut profile = TestModeProfile::default();
            if let Some(model) = lookup("STAGEWRIGHT_TEST_MODEL").filter(|m| !m.trim().is_empty()) {
                profile.model = model.trim().to_string();
            }
            if let Some(tokens) = parse_var::<u32>(&lookup, "STAGEWRIGHT_TEST_MAX_TOKENS") {
                profile.max_tokens = tokens;
            }
            config.test_mode = Some(profile);
        }

        config
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable configuration value");
            None
        }
    }
}

/// Settings for one supervised generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Silence window after which the stall watchdog fires.
    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,
    /// Absolute ceiling for one streaming call.
    #[serde(default = "default_overall_timeout_ms")]
    pub overall_timeout_ms: u64,
    /// Minimum accumulated characters for a watchdog firing to count as partial success.
    #[serde(default = "default_min_partial_chars")]
    pub min_partial_chars: usize,
    /// Retries after a watchdog failure.
    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,
    /// Maximum tool-use rounds.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Output ceiling used when a request does not set one.
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
    /// Sampling temperature used when a request does not set one.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_stall_timeout_ms() -> u64 {
    45_000
}

fn default_overall_timeout_ms() -> u64 {
    600_000
}

fn default_min_partial_chars() -> usize {
    200
}

fn default_transient_retries() -> u32 {
    1
}

fn default_max_tool_rounds() -> u32 {
    10
}

fn default_max_tokens() -> u32 {
    8000
}

fn default_temperature() -> f32 {
    1.0
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            stall_timeout_ms: default_stall_timeout_ms(),
            overall_timeout_ms: default_overall_timeout_ms(),
            min_partial_chars: default_min_partial_chars(),
            transient_retries: default_transient_retries(),
            max_tool_rounds: default_max_tool_rounds(),
            default_max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl GenerationConfig {
    /// Creates a config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the stall window.
    #[must_use]
    pub fn with_stall_timeout_ms(mut self, ms: u64) -> Self {
        self.stall_timeout_ms = ms;
        self
    }

    /// Sets the overall ceiling.
    #[must_use]
    pub fn with_overall_timeout_ms(mut self, ms: u64) -> Self {
        self.overall_timeout_ms = ms;
        self
    }

    /// Sets the partial-salvage threshold.
    #[must_use]
    pub fn with_min_partial_chars(mut self, chars: usize) -> Self {
        self.min_partial_chars = chars;
        self
    }

    /// Sets the number of watchdog retries.
    #[must_use]
    pub fn with_transient_retries(mut self, retries: u32) -> Self {
        self.transient_retries = retries;
        self
    }

    /// Sets the tool round bound.
    #[must_use]
    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    /// Returns the stall window.
    #[must_use]
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    /// Returns the overall ceiling.
    #[must_use]
    pub fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms)
    }
}

/// Connection settings for the Anthropic-style HTTP backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnthropicConfig {
    /// API root, without the `/v1/messages` suffix.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// API key sent as `x-api-key`.
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// Value of the `anthropic-version` header.
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_api_version() -> String {
    "2023-06-01".to_string()
}

impl AnthropicConfig {
    /// Creates a config for an API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: default_base_url(),
            api_key: api_key.into(),
            api_version: default_api_version(),
        }
    }

    /// Sets the API root.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Reads `ANTHROPIC_API_KEY` and `ANTHROPIC_BASE_URL`.
    pub fn from_env() -> Result<Self, crate::errors::PipelineError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| crate::errors::PipelineError::Config("ANTHROPIC_API_KEY is not set".to_string()))?;
        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("ANTHROPIC_BASE_URL") {
            config.base_url = base_url;
        }
        Ok(config)
    }

    /// Returns the messages endpoint URL.
    #[must_use]
    pub fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}

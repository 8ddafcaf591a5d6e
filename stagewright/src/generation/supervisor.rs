//! Supervised generation calls.
//!
//! Each stream runs under two watchdogs: a stall timer reset by every event
//! and an overall ceiling that ignores activity. When either fires, text
//! accumulated past the salvage threshold is returned as a partial success;
//! otherwise the call fails with a transient error that is retried once.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::backend::{GenerationBackend, ToolHandler};
use super::types::{
    ContentBlock, GenerationRequest, GenerationResponse, Message, Role, StopReason, StreamEvent, ToolCall, Usage,
};
use crate::config::{GenerationConfig, TestModeProfile};
use crate::errors::{CallError, GenerationError};
use crate::recovery::{Recovered, Recoverer};

/// Which watchdog fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Watchdog {
    Stall,
    Overall,
}

/// The result of one stream.
#[derive(Debug, Default)]
struct Turn {
    text: String,
    chars: usize,
    usage: Usage,
    stop_reason: Option<StopReason>,
    tool_calls: Vec<ToolCall>,
    partial: bool,
}

impl Turn {
    fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::TextDelta(delta) => {
                self.chars += delta.chars().count();
                self.text.push_str(&delta);
            }
            StreamEvent::ToolUse(call) => self.tool_calls.push(call),
            StreamEvent::Usage(usage) => self.usage.merge(usage),
            StreamEvent::Stop(reason) => self.stop_reason = Some(reason),
        }
    }

    fn assistant_message(&self) -> Message {
        let mut content = Vec::new();
        if !self.text.is_empty() {
            content.push(ContentBlock::Text { text: self.text.clone() });
        }
        content.extend(self.tool_calls.iter().map(|call| ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.input.clone(),
        }));
        Message {
            role: Role::Assistant,
            content,
        }
    }
}

/// Issues generation calls with watchdogs, salvage, retry and a tool loop.
#[derive(Clone)]
pub struct GenerationSupervisor {
    backend: Arc<dyn GenerationBackend>,
    config: GenerationConfig,
    test_mode: Option<TestModeProfile>,
}

impl std::fmt::Debug for GenerationSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationSupervisor")
            .field("config", &self.config)
            .field("test_mode", &self.test_mode)
            .finish_non_exhaustive()
    }
}

impl GenerationSupervisor {
    /// Creates a supervisor with default settings.
    #[must_use]
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            backend,
            config: GenerationConfig::default(),
            test_mode: None,
        }
    }

    /// Sets the watchdog and loop settings.
    #[must_use]
    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    /// Substitutes the reduced-cost profile on every request.
    #[must_use]
    pub fn with_test_mode(mut self, profile: Option<TestModeProfile>) -> Self {
        self.test_mode = profile;
        self
    }

    /// Returns the settings.
    #[must_use]
    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Performs one call without tools.
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, GenerationError> {
        self.run(request, None).await
    }

    /// Performs one call, running the tool loop when the request carries tools.
    ///
    /// The response text joins the text of every round with newlines,
    /// whether the loop ends on its own or runs out of rounds.
    pub async fn generate_with_tools(
        &self,
        request: GenerationRequest,
        tools: &dyn ToolHandler,
    ) -> Result<GenerationResponse, GenerationError> {
        self.run(request, Some(tools)).await
    }

    /// Performs one call and recovers a structured value from its text.
    pub async fn generate_structured(
        &self,
        request: GenerationRequest,
        recoverer: &Recoverer,
    ) -> Result<(GenerationResponse, Recovered), CallError> {
        let response = self.generate(request).await?;
        let recovered = recoverer.recover(&response.text)?;
        Ok((response, recovered))
    }

    fn prepare(&self, mut request: GenerationRequest) -> GenerationRequest {
        if let Some(profile) = &self.test_mode {
            request.model = profile.model.clone();
            request.max_tokens = profile.ceiling(request.max_tokens);
        } else if request.max_tokens == 0 {
            request.max_tokens = self.config.default_max_tokens;
        }
        if request.temperature.is_none() {
            request.temperature = Some(self.config.temperature);
        }
        request
    }

    async fn run(
        &self,
        request: GenerationRequest,
        tools: Option<&dyn ToolHandler>,
    ) -> Result<GenerationResponse, GenerationError> {
        let mut request = self.prepare(request);
        let model = request.model.clone();

        if request.tools.is_empty() {
            let turn = self.call_with_retry(&request).await?;
            return Ok(GenerationResponse {
                text: turn.text,
                usage: turn.usage,
                stop_reason: turn.stop_reason,
                partial: turn.partial,
                tool_rounds: 0,
                model,
            });
        }

        let mut usage = Usage::default();
        let mut texts: Vec<String> = Vec::new();
        let mut rounds = 0u32;
        let mut last_stop = None;

        while rounds < self.config.max_tool_rounds {
            let turn = self.call_with_retry(&request).await?;
            usage.accumulate(turn.usage);
            last_stop = turn.stop_reason;

            if turn.tool_calls.is_empty() || turn.partial {
                if !turn.text.is_empty() {
                    texts.push(turn.text);
                }
                return Ok(GenerationResponse {
                    text: texts.join("\n"),
                    usage,
                    stop_reason: turn.stop_reason,
                    partial: turn.partial,
                    tool_rounds: rounds,
                    model,
                });
            }

            rounds += 1;
            let handler = tools.ok_or_else(|| GenerationError::Tool {
                name: turn.tool_calls[0].name.clone(),
                reason: "no tool handler configured".to_string(),
            })?;

            let mut results = Vec::with_capacity(turn.tool_calls.len());
            for call in &turn.tool_calls {
                debug!(tool = %call.name, round = rounds, "Running tool");
                let block = match handler.call(&call.name, call.input.clone()).await {
                    Ok(content) => ContentBlock::ToolResult {
                        tool_use_id: call.id.clone(),
                        content,
                        is_error: false,
                    },
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "Tool failed; reporting to model");
                        ContentBlock::ToolResult {
                            tool_use_id: call.id.clone(),
                            content: format!("Error: {e:#}"),
                            is_error: true,
                        }
                    }
                };
                results.push(block);
            }

            if !turn.text.is_empty() {
                texts.push(turn.text.clone());
            }
            request.messages.push(turn.assistant_message());
            request.messages.push(Message {
                role: Role::User,
                content: results,
            });
        }

        warn!(rounds, "Tool round limit reached; returning accumulated text");
        Ok(GenerationResponse {
            text: texts.join("\n"),
            usage,
            stop_reason: last_stop,
            partial: false,
            tool_rounds: rounds,
            model,
        })
    }

    async fn call_with_retry(&self, request: &GenerationRequest) -> Result<Turn, GenerationError> {
        let attempts = self.config.transient_retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            match self.stream_once(request).await {
                Ok(turn) => return Ok(turn),
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(attempt, error = %e, model = %request.model, "Transient generation failure; retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn stream_once(&self, request: &GenerationRequest) -> Result<Turn, GenerationError> {
        let stall = self.config.stall_timeout();
        let overall = tokio::time::sleep(self.config.overall_timeout());
        tokio::pin!(overall);

        let mut turn = Turn::default();

        let mut stream = tokio::select! {
            biased;
            () = &mut overall => return self.salvage(turn, Watchdog::Overall),
            opened = tokio::time::timeout(stall, self.backend.open_stream(request)) => match opened {
                Err(_) => return self.salvage(turn, Watchdog::Stall),
                Ok(result) => result?,
            },
        };

        loop {
            tokio::select! {
                biased;
                () = &mut overall => return self.salvage(turn, Watchdog::Overall),
                next = tokio::time::timeout(stall, stream.next()) => match next {
                    Err(_) => return self.salvage(turn, Watchdog::Stall),
                    Ok(None) => break,
                    Ok(Some(Err(e))) => return Err(e),
                    Ok(Some(Ok(event))) => turn.apply(event),
                },
            }
        }

        if turn.stop_reason.is_none() {
            if turn.chars >= self.config.min_partial_chars {
                warn!(chars = turn.chars, "Stream ended without a stop reason; returning partial text");
                turn.partial = true;
                return Ok(turn);
            }
            return Err(GenerationError::Transport(format!(
                "stream ended before completion ({} chars received)",
                turn.chars
            )));
        }

        debug!(chars = turn.chars, stop_reason = ?turn.stop_reason, "Generation stream completed");
        Ok(turn)
    }

    fn salvage(&self, mut turn: Turn, fired: Watchdog) -> Result<Turn, GenerationError> {
        if turn.chars >= self.config.min_partial_chars {
            info!(chars = turn.chars, watchdog = ?fired, "Watchdog fired; salvaging partial text");
            turn.partial = true;
            turn.tool_calls.clear();
            return Ok(turn);
        }
        Err(match fired {
            Watchdog::Stall => GenerationError::Stalled {
                silent_ms: duration_ms(self.config.stall_timeout()),
                chars: turn.chars,
            },
            Watchdog::Overall => GenerationError::OverallTimeout {
                timeout_ms: duration_ms(self.config.overall_timeout()),
                chars: turn.chars,
            },
        })
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

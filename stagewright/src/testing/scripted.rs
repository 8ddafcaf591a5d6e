//! A generation backend that replays scripted streams.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

use crate::errors::GenerationError;
use crate::generation::{
    EventStream, GenerationBackend, GenerationRequest, StopReason, StreamEvent, ToolCall, Usage,
};

#[derive(Debug, Clone)]
enum Step {
    Event(StreamEvent),
    Error(GenerationError),
    Delay(Duration),
    Hang,
}

/// One scripted call: events, errors, pauses and hangs, replayed in order.
///
/// A script that runs out without a stop event ends the stream, like a
/// dropped connection.
#[derive(Debug, Clone, Default)]
pub struct ScriptedStream {
    steps: Vec<Step>,
}

impl ScriptedStream {
    /// Creates an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits a text delta.
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.steps.push(Step::Event(StreamEvent::TextDelta(text.into())));
        self
    }

    /// Emits a complete tool invocation.
    #[must_use]
    pub fn tool_use(mut self, id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        self.steps.push(Step::Event(StreamEvent::ToolUse(ToolCall {
            id: id.into(),
            name: name.into(),
            input,
        })));
        self
    }

    /// Emits a usage report.
    #[must_use]
    pub fn usage(mut self, input_tokens: u32, output_tokens: u32) -> Self {
        self.steps.push(Step::Event(StreamEvent::Usage(Usage {
            input_tokens,
            output_tokens,
        })));
        self
    }

    /// Emits a stop event.
    #[must_use]
    pub fn stop(mut self, reason: StopReason) -> Self {
        self.steps.push(Step::Event(StreamEvent::Stop(reason)));
        self
    }

    /// Yields an error item.
    #[must_use]
    pub fn error(mut self, error: GenerationError) -> Self {
        self.steps.push(Step::Error(error));
        self
    }

    /// Pauses before the next step.
    #[must_use]
    pub fn delay_ms(mut self, ms: u64) -> Self {
        self.steps.push(Step::Delay(Duration::from_millis(ms)));
        self
    }

    /// Goes silent forever.
    #[must_use]
    pub fn hang(mut self) -> Self {
        self.steps.push(Step::Hang);
        self
    }

    fn into_stream(self) -> EventStream {
        let steps: VecDeque<Step> = self.steps.into();
        stream::unfold(steps, |mut steps| async move {
            loop {
                match steps.pop_front()? {
                    Step::Event(event) => return Some((Ok(event), steps)),
                    Step::Error(error) => return Some((Err(error), steps)),
                    Step::Delay(duration) => tokio::time::sleep(duration).await,
                    Step::Hang => futures::future::pending::<()>().await,
                }
            }
        })
        .boxed()
    }
}

/// Replays queued [`ScriptedStream`]s, one per call, and records requests.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<ScriptedStream>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    /// Creates a backend with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the script for the next call.
    pub fn push(&self, script: ScriptedStream) {
        self.scripts.lock().push_back(script);
    }

    /// Returns the number of calls opened.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// Returns every request received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }

    /// Returns the number of scripts not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.scripts.lock().len()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn open_stream(&self, request: &GenerationRequest) -> Result<EventStream, GenerationError> {
        self.requests.lock().push(request.clone());
        let script = self
            .scripts
            .lock()
            .pop_front()
            .ok_or_else(|| GenerationError::Transport("no scripted stream left".to_string()))?;
        Ok(script.into_stream())
    }
}

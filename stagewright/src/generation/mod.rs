//! Generation call supervision.
//!
//! A [`GenerationSupervisor`] drives one logical call against a
//! [`GenerationBackend`]: it guards the stream with stall and overall
//! watchdogs, salvages partial text, retries a watchdog failure once and runs
//! the tool loop. The supervisor performs no persistence.

mod backend;
#[cfg(feature = "http")]
mod http;
mod supervisor;
mod types;

pub use backend::{EventStream, FnToolHandler, GenerationBackend, ToolHandler};
#[cfg(feature = "http")]
pub use http::{AnthropicBackend, AnthropicStreamParser, SseDecoder, SseFrame};
pub use supervisor::GenerationSupervisor;
pub use types::{
    ContentBlock, GenerationRequest, GenerationResponse, Message, Role, StopReason, StreamEvent, ToolCall, ToolSpec,
    Usage,
};

//! Seams between the supervisor, the wire and the caller's tools.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use super::types::{GenerationRequest, StreamEvent};
use crate::errors::GenerationError;

/// A stream of decoded events for one call.
pub type EventStream = BoxStream<'static, Result<StreamEvent, GenerationError>>;

/// Opens streaming calls against a generation endpoint.
///
/// Dropping the returned stream must tear down the underlying connection.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Opens one streaming call.
    async fn open_stream(&self, request: &GenerationRequest) -> Result<EventStream, GenerationError>;
}

/// Executes tools the model invokes.
///
/// A returned error is reported back to the model as a failed tool result
/// rather than aborting the call.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Runs one tool and returns its result text.
    async fn call(&self, name: &str, input: Value) -> anyhow::Result<String>;
}

/// Adapts an async closure into a [`ToolHandler`].
pub struct FnToolHandler<F> {
    func: F,
}

impl<F> FnToolHandler<F> {
    /// Wraps a closure.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> ToolHandler for FnToolHandler<F>
where
    F: Fn(String, Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<String>> + Send,
{
    async fn call(&self, name: &str, input: Value) -> anyhow::Result<String> {
        (self.func)(name.to_string(), input).await
    }
}

#[async_trait]
impl<T: ToolHandler + ?Sized> ToolHandler for Arc<T> {
    async fn call(&self, name: &str, input: Value) -> anyhow::Result<String> {
        (**self).call(name, input).await
    }
}

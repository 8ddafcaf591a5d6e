//! Stage work and clock doubles.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::pipeline::{RunContext, Sleeper, StageWork};

/// Stage work that fails its first `failures` calls, then returns a value.
#[derive(Debug)]
pub struct FlakyWork {
    failures: u32,
    value: Value,
    calls: AtomicU32,
}

impl FlakyWork {
    /// Fails `failures` times, then succeeds with `value`.
    #[must_use]
    pub fn new(failures: u32, value: Value) -> Self {
        Self {
            failures,
            value,
            calls: AtomicU32::new(0),
        }
    }

    /// Succeeds on every call.
    #[must_use]
    pub fn succeeding(value: Value) -> Self {
        Self::new(0, value)
    }

    /// Fails on every call.
    #[must_use]
    pub fn failing() -> Self {
        Self::new(u32::MAX, Value::Null)
    }

    /// Returns how many times the work ran.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageWork for FlakyWork {
    async fn run(&self, _ctx: RunContext) -> anyhow::Result<Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            anyhow::bail!("call {call} failed");
        }
        Ok(self.value.clone())
    }
}

/// A [`Sleeper`] that records every requested wait.
///
/// By default waits return immediately. [`RecordingSleeper::advancing`]
/// also sleeps on the tokio timer so paused-clock tests observe the elapsed
/// time.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
    advance: bool,
}

impl RecordingSleeper {
    /// Records without waiting.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records and waits.
    #[must_use]
    pub fn advancing() -> Self {
        Self {
            sleeps: Mutex::new(Vec::new()),
            advance: true,
        }
    }

    /// Returns every requested wait, in order.
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    /// Returns the sum of requested waits.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.sleeps.lock().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        if self.advance {
            tokio::time::sleep(duration).await;
        }
    }
}

//! Stage retry backoff and the clock it waits on.
//!
//! Backoff waits go through a [`Sleeper`] so tests can record the requested
//! delays instead of waiting them out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for stage retry delays.
///
/// `attempt` is the 1-indexed number of the attempt that just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * attempt
    #[default]
    Linear,
    /// delay = base * 2^(attempt - 1)
    Exponential,
    /// delay = base
    Constant,
}

impl BackoffStrategy {
    /// Returns the wait before the attempt after `attempt`.
    #[must_use]
    pub fn delay(self, base_ms: u64, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let ms = match self {
            Self::Linear => base_ms.saturating_mul(u64::from(attempt)),
            Self::Exponential => base_ms.saturating_mul(2u64.saturating_pow(attempt - 1)),
            Self::Constant => base_ms,
        };
        Duration::from_millis(ms)
    }
}

/// Waits between stage attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspends for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff() {
        let strategy = BackoffStrategy::Linear;
        assert_eq!(strategy.delay(2000, 1), Duration::from_millis(2000));
        assert_eq!(strategy.delay(2000, 2), Duration::from_millis(4000));
        assert_eq!(strategy.delay(2000, 3), Duration::from_millis(6000));
    }

    #[test]
    fn test_exponential_backoff() {
        let strategy = BackoffStrategy::Exponential;
        assert_eq!(strategy.delay(100, 1), Duration::from_millis(100));
        assert_eq!(strategy.delay(100, 2), Duration::from_millis(200));
        assert_eq!(strategy.delay(100, 4), Duration::from_millis(800));
    }

    #[test]
    fn test_constant_backoff() {
        assert_eq!(BackoffStrategy::Constant.delay(500, 7), Duration::from_millis(500));
    }

    #[test]
    fn test_attempt_zero_treated_as_first() {
        assert_eq!(BackoffStrategy::Linear.delay(1000, 0), Duration::from_millis(1000));
    }

    #[test]
    fn test_overflow_saturates() {
        let delay = BackoffStrategy::Exponential.delay(u64::MAX / 2, 64);
        assert_eq!(delay, Duration::from_millis(u64::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_sleeper_advances_virtual_time() {
        let start = tokio::time::Instant::now();
        TokioSleeper.sleep(Duration::from_secs(3)).await;
        assert!(start.elapsed() >= Duration::from_secs(3));
    }
}

//! Exponential backoff shared by reconnects and reply posting.
//!
//! Delays double with each attempt and are capped at a maximum. Waiting
//! between attempts always races a cancellation token so `stop` never blocks
//! on a pending retry.

use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::domain::config::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    max_retries: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, max_retries: u32) -> Self {
        let base = base.max(Duration::from_millis(1));
        Self {
            base,
            max: max.max(base),
            max_retries,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.max_retries,
        )
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Sleeps for `delay` unless `cancel` fires first. Returns `true` when cancelled.
    pub async fn wait(delay: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = sleep(delay) => false,
            _ = cancel.cancelled() => true,
        }
    }
}

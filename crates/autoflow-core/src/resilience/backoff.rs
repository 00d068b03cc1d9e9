//! Backoff delay computation.

use std::time::Duration;

use autoflow_types::automation::RetryStrategy;

/// Delay calculator for one retry loop.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub strategy: RetryStrategy,
    pub base: Duration,
    pub max: Duration,
    /// Symmetric jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_ratio: f64,
}

impl Backoff {
    pub fn new(strategy: RetryStrategy, base: Duration, max: Duration) -> Self {
        Self {
            strategy,
            base,
            max,
            jitter_ratio: 0.1,
        }
    }

    pub fn with_jitter(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Delay before the attempt following failed attempt `attempt` (1-based),
    /// without jitter, capped at `max`.
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis().min(u64::MAX as u128) as u64;
        let attempt = attempt.max(1);
        let ms = match self.strategy {
            RetryStrategy::Immediate => 0,
            RetryStrategy::Fixed => base_ms,
            RetryStrategy::Linear => base_ms.saturating_mul(u64::from(attempt)),
            RetryStrategy::Exponential => 2u64
                .checked_pow(attempt - 1)
                .map_or(u64::MAX, |factor| base_ms.saturating_mul(factor)),
        };
        Duration::from_millis(ms).min(self.max)
    }

    /// Jittered delay, never above `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        jitter(self.raw_delay(attempt), self.jitter_ratio).min(self.max)
    }
}

/// Apply symmetric jitter of `ratio` to `delay`.
pub fn jitter(delay: Duration, ratio: f64) -> Duration {
    if ratio <= 0.0 || delay.is_zero() {
        return delay;
    }
    // uniform in [-ratio, +ratio]
    let factor = 1.0 + ratio * (fastrand::f64() * 2.0 - 1.0);
    Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
}

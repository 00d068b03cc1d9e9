//! Token bucket rate limiter with a penalty block.
//!
//! Tokens refill continuously at `rate` per second up to `capacity`. When a
//! caller finds the bucket empty the limiter blocks all calls for
//! `block_for`, mirroring how remote APIs answer bursts with a long
//! retry-after window.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    blocked_until: Option<Instant>,
}

#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    rate: f64,
    block_for: Duration,
    bucket: Mutex<Bucket>,
}

impl TokenBucket {
    pub fn new(rate_per_sec: u32, block_for: Duration) -> Self {
        let capacity = f64::from(rate_per_sec.max(1));
        Self {
            capacity,
            rate: capacity,
            block_for,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
                blocked_until: None,
            }),
        }
    }

    /// Take one token. On failure returns how long the caller should wait.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();

        if let Some(until) = bucket.blocked_until {
            if now < until {
                return Err(until - now);
            }
            bucket.blocked_until = None;
            bucket.tokens = self.capacity;
            bucket.last_refill = now;
        }

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            bucket.blocked_until = Some(now + self.block_for);
            Err(self.block_for)
        }
    }

    /// Whether the limiter is inside a penalty block.
    pub fn is_blocked(&self) -> bool {
        let bucket = self.bucket.lock().unwrap_or_else(|p| p.into_inner());
        bucket.blocked_until.is_some_and(|until| Instant::now() < until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn allows_burst_up_to_capacity() {
        let limiter = TokenBucket::new(4, Duration::from_secs(60));
        for _ in 0..4 {
            assert!(limiter.try_acquire().is_ok());
        }
        let wait = limiter.try_acquire().unwrap_err();
        assert_eq!(wait, Duration::from_secs(60));
        assert!(limiter.is_blocked());
    }

    #[tokio::test(start_paused = true)]
    async fn stays_blocked_for_penalty_window() {
        let limiter = TokenBucket::new(4, Duration::from_secs(60));
        for _ in 0..5 {
            let _ = limiter.try_acquire();
        }
        // refill alone would have restored tokens by now
        tokio::time::advance(Duration::from_secs(30)).await;
        let wait = limiter.try_acquire().unwrap_err();
        assert_eq!(wait, Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(limiter.try_acquire().is_ok());
        assert!(!limiter.is_blocked());
    }

    #[tokio::test(start_paused = true)]
    async fn refills_at_rate() {
        let limiter = TokenBucket::new(4, Duration::from_secs(60));
        for _ in 0..4 {
            limiter.try_acquire().unwrap();
        }
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_ok());
    }
}

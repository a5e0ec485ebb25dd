//! Shared retry policy: capped exponential backoff with full jitter.
//!
//! One policy serves every transient-I/O caller so outages don't turn into
//! tight retry loops. The jitter factor lands in [0.5, 1.0), derived from
//! the clock's sub-second nanos rather than a RNG dependency.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: base_delay.max(Duration::from_millis(1)),
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Delay before the retry following `attempt` (1-based), pre-jitter.
    fn raw_delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails terminally, or attempts run out.
    /// `retryable` decides which errors are worth another attempt.
    pub async fn run<T, E, Fut, Op, P>(&self, mut op: Op, retryable: P) -> Result<T, E>
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && retryable(&err) => {
                    let delay = full_jitter(self.raw_delay(attempt));
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn full_jitter(delay: Duration) -> Duration {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let factor = 0.5 + (nanos as f64 / 1_000_000_000.0) * 0.5;
    delay.mul_f64(factor)
}

use std::time::Duration;

use rand::Rng;

/// Bounded retry with exponential backoff for the approval step.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub interval: Duration,
    pub backoff_rate: f64,
    pub max_backoff: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            interval: Duration::from_secs(1),
            backoff_rate: 2.0,
            max_backoff: Duration::from_secs(60),
            jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn allows_another(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self.interval.as_millis() as f64;
        let max = self.max_backoff.as_millis() as f64;

        // Exponential: interval * rate^(retry - 1)
        let raw_backoff = base * self.backoff_rate.powi(retry.saturating_sub(1) as i32);
        let capped_backoff = raw_backoff.min(max);

        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };

        Duration::from_millis((capped_backoff as u64) + jitter)
    }
}

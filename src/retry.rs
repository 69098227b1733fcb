use std::time::Duration;

/// Bounded retry policy for a single fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
    /// Per-attempt request timeout.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(2),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Total attempts including the first one.
    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(retry as i32);
        Duration::from_secs_f64(secs.min(self.max_backoff.as_secs_f64()))
    }

    /// Delay before retry `retry`, stretched to a server-provided hint but
    /// never past `max_backoff`.
    pub fn backoff_with_hint(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let base = self.backoff(retry);
        match hint {
            Some(h) => h.max(base).min(self.max_backoff),
            None => base,
        }
    }
}

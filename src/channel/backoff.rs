use std::time::Duration;

/// Exponential reconnect backoff: attempt `n` (0-based) waits `base * 2^n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_retries: 3,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_retries,
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Delays of every attempt, in order
    pub fn delays(self) -> impl Iterator<Item = Duration> {
        (0..self.max_retries).map(move |attempt| self.delay(attempt))
    }
}

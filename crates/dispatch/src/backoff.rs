//! Exponential backoff schedule shared by queue insertion and delivery
//! retries: each wait doubles the previous one, capped at a ceiling.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    /// First non-zero wait.
    pub initial: Duration,
    /// Ceiling; once reached, subsequent waits stay here.
    pub max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    pub fn first(&self) -> Duration {
        self.initial.min(self.max)
    }

    /// The wait after `prev`. Strictly greater than `prev` until the
    /// ceiling is reached.
    pub fn next(&self, prev: Duration) -> Duration {
        if prev.is_zero() {
            return self.first();
        }
        prev.saturating_mul(2).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(300),
        }
    }
}

use std::time::Duration;

use crate::settings::Reconnect;

/// Exponential reconnect delays with a bounded number of attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
    attempt: u32,
    delay: Duration,
}

impl Backoff {
    pub fn new(policy: &Reconnect) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            initial_delay: policy.initial_delay(),
            max_delay: policy.max_delay(),
            multiplier: policy.multiplier.max(1.0),
            jitter: policy.jitter,
            attempt: 0,
            delay: policy.initial_delay(),
        }
    }

    /// Attempts consumed since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.delay = self.initial_delay;
    }

    /// Delay before the next attempt, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;

        let base = self.delay;
        self.delay = Duration::from_millis((base.as_millis() as f64 * self.multiplier) as u64)
            .min(self.max_delay);

        if self.jitter {
            let spread = base.as_millis() as f64 * 0.5 * rand::random::<f64>();
            Some((base + Duration::from_millis(spread as u64)).min(self.max_delay))
        } else {
            Some(base)
        }
    }
}

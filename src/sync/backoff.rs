//! Reconnect backoff.
//!
//! Exponential delays with random jitter, capped, and a bounded number of
//! attempts. Once the attempts run out the peer stops trying and the
//! authority settles the match as abandoned when its grace window ends.

use std::time::Duration;

use rand::Rng;

/// Reconnect policy.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    /// First delay.
    pub base_delay: Duration,
    /// Ceiling on any delay.
    pub max_delay: Duration,
    /// Attempts before giving up.
    pub max_attempts: u32,
    /// Jitter fraction in `[0, 1)`; each delay moves by up to this much.
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_attempts: 6,
            jitter: 0.2,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before `attempt` (0-based), or `None` when exhausted.
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let base = self.base_delay.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << attempt.min(32));
        let capped = exp.min(self.max_delay.as_millis() as u64) as f64;
        let factor = if self.jitter > 0.0 {
            1.0 + rng.gen_range(-self.jitter..self.jitter)
        } else {
            1.0
        };
        Some(Duration::from_millis((capped * factor).max(0.0) as u64))
    }
}

/// Attempt counter over a policy.
#[derive(Clone, Debug)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    /// Fresh counter.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Next delay, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.policy.delay_for(self.attempt, &mut rand::thread_rng())?;
        self.attempt += 1;
        Some(delay)
    }

    /// Attempts used.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Back to the first delay after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

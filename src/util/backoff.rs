//! Jittered exponential backoff
//!
//! Used by worker agents while the leader's registration endpoint is not yet
//! listening. Jitter keeps thousands of ranks from reconnecting in lockstep.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with ±50% jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            max,
        }
    }

    /// Delay before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let base = self.next;
        self.next = (self.next * 2).min(self.max);

        let factor = rand::thread_rng().gen_range(0.5..1.5);
        base.mul_f64(factor)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_secs(2))
    }
}

//! Worker backoff after infrastructure errors.
//!
//! Independent of the per-message policy: an outage consumes no retry
//! budget, the worker just waits longer before polling again.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct InfrastructureBackoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl InfrastructureBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: 0,
        }
    }

    /// Exponential delay for the next wait, capped, with +-25% jitter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.failures.min(16);
        self.failures = self.failures.saturating_add(1);

        let delay = self
            .base
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max)
            .min(self.max);

        let millis = delay.as_millis() as u64;
        let spread = millis / 4;
        if spread == 0 {
            return delay;
        }
        let jittered = rand::thread_rng().gen_range(millis - spread..=millis + spread);
        Duration::from_millis(jittered)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

impl Default for InfrastructureBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_until_capped() {
        let mut backoff = InfrastructureBackoff::new(Duration::from_millis(100), Duration::from_secs(1));
        let first = backoff.next_delay();
        assert!(first >= Duration::from_millis(75) && first <= Duration::from_millis(125));

        for _ in 0..10 {
            backoff.next_delay();
        }
        let capped = backoff.next_delay();
        assert!(capped <= Duration::from_millis(1_250));
        assert!(capped >= Duration::from_millis(750));
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = InfrastructureBackoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert!(backoff.next_delay() <= Duration::from_millis(125));
    }
}

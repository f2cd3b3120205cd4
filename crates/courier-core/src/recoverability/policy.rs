//! Recoverability policy: what to do after the n-th failed attempt.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::RecoverabilityConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Release the message; it is eligible again right away.
    RetryImmediately { attempt: u32 },

    /// Re-enqueue the message, invisible until `eligible_at`.
    RetryAt { round: u32, eligible_at: DateTime<Utc> },

    /// Move the message to the error queue.
    DeadLetter,
}

/// Immediate retries first, then delayed retries with a linearly growing
/// delay (`time_increase * round`), then dead-letter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverabilityPolicy {
    immediate_retries: u32,
    delayed_retries: u32,
    time_increase: Duration,
}

impl RecoverabilityPolicy {
    pub fn new(immediate_retries: u32, delayed_retries: u32, time_increase: Duration) -> Self {
        Self {
            immediate_retries,
            delayed_retries,
            time_increase,
        }
    }

    /// No retries at all: the first failure dead-letters.
    pub fn disabled() -> Self {
        Self::new(0, 0, Duration::ZERO)
    }

    pub fn from_config(config: &RecoverabilityConfig) -> Self {
        if config.enabled {
            Self::new(
                config.immediate_retries,
                config.delayed_retries,
                config.time_increase,
            )
        } else {
            Self::disabled()
        }
    }

    pub fn immediate_retries(&self) -> u32 {
        self.immediate_retries
    }

    pub fn delayed_retries(&self) -> u32 {
        self.delayed_retries
    }

    /// Upper bound on handler invocations for one message.
    pub fn max_invocations(&self) -> u32 {
        self.immediate_retries
            .saturating_add(self.delayed_retries)
            .saturating_add(1)
    }

    /// Delay of delayed round `round` (1-based).
    pub fn delay_for_round(&self, round: u32) -> Duration {
        self.time_increase
            .checked_mul(round)
            .unwrap_or(Duration::MAX)
    }

    /// Decide after `failures` failed attempts (already counting the one that just failed).
    pub fn decide(&self, failures: u32, now: DateTime<Utc>) -> RecoveryAction {
        if failures <= self.immediate_retries {
            return RecoveryAction::RetryImmediately { attempt: failures };
        }
        let round = failures - self.immediate_retries;
        if round <= self.delayed_retries {
            let eligible_at = chrono::Duration::from_std(self.delay_for_round(round))
                .ok()
                .and_then(|delay| now.checked_add_signed(delay))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            return RecoveryAction::RetryAt { round, eligible_at };
        }
        RecoveryAction::DeadLetter
    }
}

impl Default for RecoverabilityPolicy {
    fn default() -> Self {
        Self::from_config(&RecoverabilityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[rstest]
    #[case(1, RecoveryAction::RetryImmediately { attempt: 1 })]
    #[case(3, RecoveryAction::RetryImmediately { attempt: 3 })]
    #[case(4, RecoveryAction::RetryAt { round: 1, eligible_at: at(1_010) })]
    #[case(5, RecoveryAction::RetryAt { round: 2, eligible_at: at(1_020) })]
    #[case(6, RecoveryAction::DeadLetter)]
    #[case(7, RecoveryAction::DeadLetter)]
    fn three_immediate_then_two_delayed(#[case] failures: u32, #[case] expected: RecoveryAction) {
        let policy = RecoverabilityPolicy::new(3, 2, Duration::from_secs(10));
        assert_eq!(policy.decide(failures, at(1_000)), expected);
    }

    #[test]
    fn delays_grow_linearly() {
        let policy = RecoverabilityPolicy::new(0, 5, Duration::from_secs(10));
        let delays: Vec<_> = (1..=5).map(|r| policy.delay_for_round(r)).collect();

        assert!(delays.windows(2).all(|w| w[1] > w[0]));
        assert_eq!(delays[2], Duration::from_secs(30));
    }

    #[test]
    fn disabled_dead_letters_on_first_failure() {
        let config = RecoverabilityConfig {
            enabled: false,
            ..RecoverabilityConfig::default()
        };
        let policy = RecoverabilityPolicy::from_config(&config);

        assert_eq!(policy.max_invocations(), 1);
        assert_eq!(policy.decide(1, at(0)), RecoveryAction::DeadLetter);
    }

    #[test]
    fn max_invocations_counts_the_first_attempt() {
        assert_eq!(
            RecoverabilityPolicy::new(3, 2, Duration::from_secs(1)).max_invocations(),
            6
        );
    }

    #[test]
    fn huge_delay_saturates() {
        let policy = RecoverabilityPolicy::new(0, u32::MAX, Duration::MAX);
        match policy.decide(2, at(0)) {
            RecoveryAction::RetryAt { eligible_at, .. } => {
                assert_eq!(eligible_at, DateTime::<Utc>::MAX_UTC)
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

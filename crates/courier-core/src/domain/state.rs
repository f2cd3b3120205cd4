//! Recoverability state machine and per-call processing outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Recoverability state of one message.
///
/// State transitions:
/// - Received -> Processed
/// - Received -> ImmediateRetry(1..=i) -> DelayedRetry(1..=d) -> DeadLettered
/// - Received -> DeadLettered (malformed, or no retries configured)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoveryState {
    Received,
    ImmediateRetry(u32),
    DelayedRetry(u32),
    DeadLettered,
    Processed,
}

impl RecoveryState {
    /// Is this a terminal state (no further automatic processing)?
    pub fn is_terminal(self) -> bool {
        matches!(self, RecoveryState::DeadLettered | RecoveryState::Processed)
    }
}

/// What a single dispatcher pass did with the message it received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Processed,
    ImmediateRetry { attempt: u32 },
    DelayedRetry { round: u32, eligible_at: DateTime<Utc> },
    DeadLettered { reason: String },
}

impl ProcessOutcome {
    pub fn state(&self) -> RecoveryState {
        match self {
            ProcessOutcome::Processed => RecoveryState::Processed,
            ProcessOutcome::ImmediateRetry { attempt } => RecoveryState::ImmediateRetry(*attempt),
            ProcessOutcome::DelayedRetry { round, .. } => RecoveryState::DelayedRetry(*round),
            ProcessOutcome::DeadLettered { .. } => RecoveryState::DeadLettered,
        }
    }
}

//! Delivery attempt bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EndpointAddress, MessageId};

/// Persisted failure history of a message that has not yet succeeded.
///
/// Lives in the store outside of any handler transaction, so a rolled-back
/// attempt still counts. Deleted on success or dead-letter.
///
/// Scoped to the receiving queue: the same published message delivered to
/// two endpoints has two independent histories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub queue: EndpointAddress,

    pub message_id: MessageId,

    /// Number of failed handler executions so far.
    pub attempts: u32,

    pub last_failure: Option<String>,

    /// Earliest time the next delayed retry may run.
    pub next_eligible_at: Option<DateTime<Utc>>,
}

impl DeliveryAttempt {
    pub fn new(queue: EndpointAddress, message_id: MessageId) -> Self {
        Self {
            queue,
            message_id,
            attempts: 0,
            last_failure: None,
            next_eligible_at: None,
        }
    }

    pub fn record_failure(&mut self, reason: String) {
        self.attempts += 1;
        self.last_failure = Some(reason);
    }
}

/// What `DurableStore::record_attempt` should write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Handler failed; increments the count.
    Failed { reason: String },

    /// A delayed retry was scheduled.
    RetryScheduled { eligible_at: DateTime<Utc> },

    /// Processed; the record is deleted.
    Succeeded,

    /// Moved to the error queue; the record is deleted.
    DeadLettered,
}

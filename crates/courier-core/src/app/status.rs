//! Endpoint counters and the report pushed by the metrics loop.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{EndpointAddress, ProcessOutcome};

/// Monotonic counters shared by all workers of an endpoint.
#[derive(Debug, Default)]
pub struct EndpointMetrics {
    processed: AtomicU64,
    handler_failures: AtomicU64,
    immediate_retries: AtomicU64,
    delayed_retries: AtomicU64,
    dead_lettered: AtomicU64,
    infrastructure_errors: AtomicU64,
    configuration_errors: AtomicU64,
}

impl EndpointMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_outcome(&self, outcome: &ProcessOutcome) {
        let counter = match outcome {
            ProcessOutcome::Processed => &self.processed,
            ProcessOutcome::ImmediateRetry { .. } => &self.immediate_retries,
            ProcessOutcome::DelayedRetry { .. } => &self.delayed_retries,
            ProcessOutcome::DeadLettered { .. } => &self.dead_lettered,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_infrastructure_error(&self) {
        self.infrastructure_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_configuration_error(&self) {
        self.configuration_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            immediate_retries: self.immediate_retries.load(Ordering::Relaxed),
            delayed_retries: self.delayed_retries.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            infrastructure_errors: self.infrastructure_errors.load(Ordering::Relaxed),
            configuration_errors: self.configuration_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub processed: u64,
    pub handler_failures: u64,
    pub immediate_retries: u64,
    pub delayed_retries: u64,
    pub dead_lettered: u64,
    pub infrastructure_errors: u64,
    pub configuration_errors: u64,
}

/// One periodic metrics push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub endpoint: EndpointAddress,
    pub reported_at: DateTime<Utc>,
    /// `None` when the store could not be reached for the depth query.
    pub queue_depth: Option<usize>,
    pub counters: MetricsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_land_in_their_counter() {
        let metrics = EndpointMetrics::new();
        metrics.record_outcome(&ProcessOutcome::Processed);
        metrics.record_outcome(&ProcessOutcome::ImmediateRetry { attempt: 1 });
        metrics.record_outcome(&ProcessOutcome::DeadLettered {
            reason: "x".into(),
        });
        metrics.record_handler_failure();

        let snap = metrics.snapshot();
        assert_eq!(snap.processed, 1);
        assert_eq!(snap.immediate_retries, 1);
        assert_eq!(snap.delayed_retries, 0);
        assert_eq!(snap.dead_lettered, 1);
        assert_eq!(snap.handler_failures, 1);
    }
}

//! Applies recovery actions to a message whose handlers failed.
//!
//! Every entry point takes ownership of the `TransactionScope` that holds
//! the receive and releases it: rollback for an immediate retry, commit for
//! a delayed retry or a dead-letter (the re-enqueue or error-queue copy
//! commits together with the removal from the input queue).

use std::sync::Arc;

use tracing::{info, warn};

use super::policy::{RecoverabilityPolicy, RecoveryAction};
use crate::app::transaction::TransactionScope;
use crate::domain::{
    AttemptOutcome, DeliveryAttempt, EndpointAddress, Message, ProcessOutcome, headers,
};
use crate::error::{CourierError, ErrorKind, Result};
use crate::ports::{Clock, DurableStore, Transport};

pub struct RecoverabilityEngine {
    policy: RecoverabilityPolicy,
    store: Arc<dyn DurableStore>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    input_queue: EndpointAddress,
    error_queue: EndpointAddress,
    audit_queue: Option<EndpointAddress>,
}

impl RecoverabilityEngine {
    pub fn new(
        policy: RecoverabilityPolicy,
        store: Arc<dyn DurableStore>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        input_queue: EndpointAddress,
        error_queue: EndpointAddress,
        audit_queue: Option<EndpointAddress>,
    ) -> Self {
        Self {
            policy,
            store,
            transport,
            clock,
            input_queue,
            error_queue,
            audit_queue,
        }
    }

    pub fn policy(&self) -> &RecoverabilityPolicy {
        &self.policy
    }

    /// True once no further handler invocation is allowed for this history.
    pub fn budget_exhausted(&self, attempt: &DeliveryAttempt) -> bool {
        attempt.attempts >= self.policy.max_invocations()
    }

    /// Count the failure and act on it. The scope must already be rolled back
    /// to its savepoint so handler side effects are gone.
    pub async fn on_handler_failure(
        &self,
        scope: TransactionScope,
        message: &Message,
        reason: String,
    ) -> Result<ProcessOutcome> {
        let failed = AttemptOutcome::Failed {
            reason: reason.clone(),
        };
        let attempt = match self
            .store
            .record_attempt(&self.input_queue, message.id(), failed)
            .await
        {
            Ok(Some(attempt)) => attempt,
            Ok(None) => {
                return Err(scope
                    .abort(CourierError::StoreUnavailable(format!(
                        "no attempt record returned for {}",
                        message.id()
                    )))
                    .await);
            }
            Err(err) => return Err(scope.abort(err).await),
        };

        match self.policy.decide(attempt.attempts, self.clock.now()) {
            RecoveryAction::RetryImmediately { attempt: n } => {
                scope.rollback().await?;
                info!(
                    message_id = %message.id(),
                    attempt = n,
                    of = self.policy.immediate_retries(),
                    "immediate retry"
                );
                Ok(ProcessOutcome::ImmediateRetry { attempt: n })
            }
            RecoveryAction::RetryAt { round, eligible_at } => {
                let deferred = message.with_header(headers::DELAYED_ROUND, round.to_string());
                if let Err(err) = self
                    .transport
                    .defer(scope.id(), &self.input_queue, deferred, eligible_at)
                    .await
                {
                    return Err(scope.abort(err).await);
                }
                scope.commit().await?;
                if let Err(err) = self
                    .store
                    .record_attempt(
                        &self.input_queue,
                        message.id(),
                        AttemptOutcome::RetryScheduled { eligible_at },
                    )
                    .await
                {
                    warn!(message_id = %message.id(), error = %err, "could not record retry schedule");
                }
                info!(
                    message_id = %message.id(),
                    round,
                    of = self.policy.delayed_retries(),
                    %eligible_at,
                    "delayed retry scheduled"
                );
                Ok(ProcessOutcome::DelayedRetry { round, eligible_at })
            }
            RecoveryAction::DeadLetter => {
                self.dead_letter(scope, message, &reason, attempt.attempts, ErrorKind::Business)
                    .await
            }
        }
    }

    /// Move `message` to the error queue (plus an audit copy) and commit.
    pub async fn dead_letter(
        &self,
        scope: TransactionScope,
        message: &Message,
        reason: &str,
        attempts: u32,
        kind: ErrorKind,
    ) -> Result<ProcessOutcome> {
        let now = self.clock.now();
        let failed = message
            .with_header(headers::FAILURE_REASON, reason)
            .header_set(headers::FAILURE_ATTEMPTS, attempts.to_string())
            .header_set(headers::FAILURE_QUEUE, self.input_queue.as_str())
            .header_set(headers::FAILURE_TIME, now.to_rfc3339())
            .header_set(headers::FAILURE_KIND, kind.as_str());

        let staged = async {
            self.transport
                .send(scope.id(), &self.error_queue, failed.clone())
                .await?;
            if let Some(audit) = &self.audit_queue {
                let copy = failed
                    .header_set(headers::AUDIT_OUTCOME, "dead-lettered")
                    .header_set(headers::AUDIT_ENDPOINT, self.input_queue.as_str())
                    .header_set(headers::AUDIT_TIME, now.to_rfc3339());
                self.transport.send(scope.id(), audit, copy).await?;
            }
            Ok::<_, CourierError>(())
        }
        .await;
        if let Err(err) = staged {
            return Err(scope.abort(err).await);
        }
        scope.commit().await?;

        if let Err(err) = self
            .store
            .record_attempt(&self.input_queue, message.id(), AttemptOutcome::DeadLettered)
            .await
        {
            warn!(message_id = %message.id(), error = %err, "could not clear attempt record");
        }
        warn!(
            message_id = %message.id(),
            message_type = %message.message_type(),
            attempts,
            kind = kind.as_str(),
            error_queue = %self.error_queue,
            reason,
            "message dead-lettered"
        );
        Ok(ProcessOutcome::DeadLettered {
            reason: reason.to_string(),
        })
    }
}

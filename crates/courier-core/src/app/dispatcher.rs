//! Dispatcher: receive one message and run it through its handlers inside
//! a single store transaction.
//!
//! Flow of `process_next`:
//! 1. begin a `TransactionScope`, receive from the input queue
//! 2. guard: a message whose attempt history already hit the ceiling is
//!    dead-lettered without running handlers
//! 3. decode; unknown type or bad payload is dead-lettered right away
//! 4. no handlers: moved to the error queue, `NoHandlerRegistered` returned
//! 5. savepoint, run handlers in registration order
//! 6. success: audit copy, commit
//! 7. failure: roll back to the savepoint and let the recoverability
//!    engine decide; infrastructure errors roll back everything instead

use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, debug, error, info_span, warn};

use crate::app::context::HandlerContext;
use crate::app::outgoing::Outgoing;
use crate::app::status::EndpointMetrics;
use crate::app::transaction::TransactionScope;
use crate::config::EndpointConfig;
use crate::domain::{AttemptOutcome, EndpointAddress, Message, ProcessOutcome, headers};
use crate::error::{CourierError, ErrorKind, Result};
use crate::ports::{Clock, DurableStore, Transport};
use crate::recoverability::{RecoverabilityEngine, RecoverabilityPolicy};
use crate::typed::HandlerRegistry;

pub struct Dispatcher {
    input: EndpointAddress,
    audit_queue: Option<EndpointAddress>,
    receive_timeout: Duration,
    store: Arc<dyn DurableStore>,
    transport: Arc<dyn Transport>,
    registry: Arc<HandlerRegistry>,
    engine: RecoverabilityEngine,
    outgoing: Arc<Outgoing>,
    clock: Arc<dyn Clock>,
    metrics: Arc<EndpointMetrics>,
}

impl Dispatcher {
    pub fn new(
        config: &EndpointConfig,
        store: Arc<dyn DurableStore>,
        transport: Arc<dyn Transport>,
        registry: Arc<HandlerRegistry>,
        outgoing: Arc<Outgoing>,
        clock: Arc<dyn Clock>,
        metrics: Arc<EndpointMetrics>,
    ) -> Self {
        let engine = RecoverabilityEngine::new(
            RecoverabilityPolicy::from_config(config.recoverability()),
            Arc::clone(&store),
            Arc::clone(&transport),
            Arc::clone(&clock),
            config.input_queue().clone(),
            config.error_queue().clone(),
            config.audit_queue().cloned(),
        );
        Self {
            input: config.input_queue().clone(),
            audit_queue: config.audit_queue().cloned(),
            receive_timeout: config.receive_timeout(),
            store,
            transport,
            registry,
            engine,
            outgoing,
            clock,
            metrics,
        }
    }

    pub fn input_queue(&self) -> &EndpointAddress {
        &self.input
    }

    pub fn metrics(&self) -> &Arc<EndpointMetrics> {
        &self.metrics
    }

    /// Block until a message may be eligible on the input queue, or the receive timeout.
    pub async fn wait_for_message(&self) {
        self.transport
            .wait_for_message(&self.input, self.receive_timeout)
            .await;
    }

    /// Process at most one message. `Ok(None)` when nothing is eligible.
    pub async fn process_next(&self) -> Result<Option<ProcessOutcome>> {
        let result = self.receive_and_dispatch().await;
        match &result {
            Ok(Some(outcome)) => self.metrics.record_outcome(outcome),
            Ok(None) => {}
            Err(err) => match err.kind() {
                ErrorKind::Infrastructure => self.metrics.record_infrastructure_error(),
                ErrorKind::Configuration => self.metrics.record_configuration_error(),
                _ => {}
            },
        }
        result
    }

    async fn receive_and_dispatch(&self) -> Result<Option<ProcessOutcome>> {
        let scope = TransactionScope::begin(Arc::clone(&self.store)).await?;
        let message = match self.transport.receive(scope.id(), &self.input).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                scope.rollback().await?;
                return Ok(None);
            }
            Err(err) => return Err(scope.abort(err).await),
        };

        let span = info_span!(
            "dispatch",
            message_id = %message.id(),
            message_type = %message.message_type(),
            txn = %scope.id(),
        );
        self.dispatch(scope, message).instrument(span).await.map(Some)
    }

    async fn dispatch(&self, scope: TransactionScope, message: Message) -> Result<ProcessOutcome> {
        let prior = match self.store.delivery_attempt(&self.input, message.id()).await {
            Ok(prior) => prior,
            Err(err) => return Err(scope.abort(err).await),
        };
        if let Some(prior) = prior.filter(|p| self.engine.budget_exhausted(p)) {
            let reason = prior
                .last_failure
                .unwrap_or_else(|| "retry budget exhausted".to_string());
            return self
                .engine
                .dead_letter(scope, &message, &reason, prior.attempts, ErrorKind::Business)
                .await;
        }

        let payload = match self.registry.decode(&message) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "cannot decode message");
                return self
                    .engine
                    .dead_letter(scope, &message, &err.to_string(), 0, err.kind())
                    .await;
            }
        };

        let handlers = self.registry.handlers_for(message.message_type());
        if handlers.is_empty() {
            let err = CourierError::NoHandlerRegistered(message.message_type().clone());
            error!(error = %err, "no handler registered, moving message to the error queue");
            self.engine
                .dead_letter(scope, &message, &err.to_string(), 0, err.kind())
                .await?;
            return Err(err);
        }

        if let Err(err) = scope.savepoint().await {
            return Err(scope.abort(err).await);
        }

        let ctx = HandlerContext::new(scope.id(), message.clone(), Arc::clone(&self.outgoing));
        let mut failure = None;
        for handler in handlers {
            if let Err(err) = handler.handle_dyn(payload.clone(), &ctx).await {
                debug!(handler = handler.name(), error = %err, "handler failed");
                failure = Some(err);
                break;
            }
        }
        drop(ctx);

        let Some(err) = failure else {
            return self.complete(scope, &message).await;
        };

        match err.kind() {
            ErrorKind::Infrastructure => {
                warn!(error = %err, "infrastructure error during handling, rolling back");
                Err(scope.abort(err).await)
            }
            kind @ (ErrorKind::Configuration | ErrorKind::Unrecoverable) => {
                if let Err(rollback_err) = scope.rollback_to_savepoint().await {
                    return Err(scope.abort(rollback_err).await);
                }
                error!(error = %err, "handler raised a non-retryable error");
                let outcome = self
                    .engine
                    .dead_letter(scope, &message, &err.to_string(), 1, kind)
                    .await?;
                if kind == ErrorKind::Configuration {
                    return Err(err);
                }
                Ok(outcome)
            }
            ErrorKind::Business | ErrorKind::Terminal => {
                self.metrics.record_handler_failure();
                warn!(error = %err, "handler failed");
                if let Err(rollback_err) = scope.rollback_to_savepoint().await {
                    return Err(scope.abort(rollback_err).await);
                }
                self.engine
                    .on_handler_failure(scope, &message, err.to_string())
                    .await
            }
        }
    }

    async fn complete(&self, scope: TransactionScope, message: &Message) -> Result<ProcessOutcome> {
        if let Some(audit) = &self.audit_queue {
            let copy = message
                .with_header(headers::AUDIT_OUTCOME, "processed")
                .header_set(headers::AUDIT_ENDPOINT, self.input.as_str())
                .header_set(headers::AUDIT_TIME, self.clock.now().to_rfc3339());
            if let Err(err) = self.transport.send(scope.id(), audit, copy).await {
                return Err(scope.abort(err).await);
            }
        }
        scope.commit().await?;

        if let Err(err) = self
            .store
            .record_attempt(&self.input, message.id(), AttemptOutcome::Succeeded)
            .await
        {
            warn!(error = %err, "could not clear attempt record");
        }
        debug!("message processed");
        Ok(ProcessOutcome::Processed)
    }
}

//! Metrics destinations.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::app::status::MetricsReport;
use crate::app::transaction::TransactionScope;
use crate::domain::{EndpointAddress, Message, MessageType, headers};
use crate::error::Result;
use crate::ports::{Clock, DurableStore, MetricsSink, Transport};

/// Type tag of metrics report messages.
pub const METRICS_MESSAGE_TYPE: &str = "courier.metrics.v1";

/// Pushes each report as a message to a collector queue.
pub struct QueueMetricsSink {
    store: Arc<dyn DurableStore>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    destination: EndpointAddress,
}

impl QueueMetricsSink {
    pub fn new(
        store: Arc<dyn DurableStore>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        destination: EndpointAddress,
    ) -> Self {
        Self {
            store,
            transport,
            clock,
            destination,
        }
    }
}

#[async_trait]
impl MetricsSink for QueueMetricsSink {
    async fn push(&self, report: &MetricsReport) -> Result<()> {
        let message = Message::json(
            MessageType::new(METRICS_MESSAGE_TYPE),
            report,
            self.clock.now(),
        )?
        .header_set(headers::ORIGINATING_ENDPOINT, report.endpoint.as_str());

        let scope = TransactionScope::begin(Arc::clone(&self.store)).await?;
        match self
            .transport
            .send(scope.id(), &self.destination, message)
            .await
        {
            Ok(()) => scope.commit().await,
            Err(err) => Err(scope.abort(err).await),
        }
    }
}

/// Emits each report as a tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMetricsSink;

#[async_trait]
impl MetricsSink for LogMetricsSink {
    async fn push(&self, report: &MetricsReport) -> Result<()> {
        let c = &report.counters;
        info!(
            endpoint = %report.endpoint,
            queue_depth = ?report.queue_depth,
            processed = c.processed,
            handler_failures = c.handler_failures,
            immediate_retries = c.immediate_retries,
            delayed_retries = c.delayed_retries,
            dead_lettered = c.dead_lettered,
            infrastructure_errors = c.infrastructure_errors,
            configuration_errors = c.configuration_errors,
            "endpoint metrics"
        );
        Ok(())
    }
}

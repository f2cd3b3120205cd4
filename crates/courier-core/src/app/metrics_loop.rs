//! Periodic push of endpoint counters to a metrics sink.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::app::status::{EndpointMetrics, MetricsReport};
use crate::domain::EndpointAddress;
use crate::error::Result;
use crate::ports::{Clock, DurableStore, MetricsSink};

pub struct MetricsLoop {
    store: Arc<dyn DurableStore>,
    metrics: Arc<EndpointMetrics>,
    sink: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    endpoint: EndpointAddress,
    interval: Duration,
}

impl MetricsLoop {
    pub fn new(
        store: Arc<dyn DurableStore>,
        metrics: Arc<EndpointMetrics>,
        sink: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
        endpoint: EndpointAddress,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            metrics,
            sink,
            clock,
            endpoint,
            interval,
        }
    }

    pub async fn report(&self) -> MetricsReport {
        let queue_depth = match self.store.queue_depth(&self.endpoint).await {
            Ok(depth) => Some(depth),
            Err(err) => {
                debug!(error = %err, "queue depth unavailable");
                None
            }
        };
        MetricsReport {
            endpoint: self.endpoint.clone(),
            reported_at: self.clock.now(),
            queue_depth,
            counters: self.metrics.snapshot(),
        }
    }

    pub async fn push_once(&self) -> Result<()> {
        let report = self.report().await;
        self.sink.push(&report).await
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the first tick fires immediately; skip it so the first report has data
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.push_once().await {
                        warn!(error = %err, "metrics push failed");
                    }
                }
            }
        }
        debug!("metrics loop stopped");
    }
}

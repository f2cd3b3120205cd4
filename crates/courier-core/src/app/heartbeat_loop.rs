//! Periodic heartbeat messages so a monitor can tell the endpoint is alive.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::app::transaction::TransactionScope;
use crate::domain::{EndpointAddress, Message, MessageType, headers};
use crate::error::Result;
use crate::ports::{Clock, DurableStore, Transport};

pub const HEARTBEAT_MESSAGE_TYPE: &str = "courier.heartbeat.v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub endpoint: EndpointAddress,
    /// Identifies this process among instances of the same endpoint.
    pub host_id: String,
    pub sent_at: DateTime<Utc>,
}

pub struct HeartbeatLoop {
    store: Arc<dyn DurableStore>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    endpoint: EndpointAddress,
    destination: EndpointAddress,
    interval: Duration,
    host_id: String,
}

impl HeartbeatLoop {
    pub fn new(
        store: Arc<dyn DurableStore>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        endpoint: EndpointAddress,
        destination: EndpointAddress,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            clock,
            endpoint,
            destination,
            interval,
            host_id: Ulid::new().to_string(),
        }
    }

    /// Send one heartbeat in its own transaction.
    pub async fn beat(&self) -> Result<()> {
        let heartbeat = Heartbeat {
            endpoint: self.endpoint.clone(),
            host_id: self.host_id.clone(),
            sent_at: self.clock.now(),
        };
        let message = Message::json(
            MessageType::new(HEARTBEAT_MESSAGE_TYPE),
            &heartbeat,
            heartbeat.sent_at,
        )?
        .header_set(headers::ORIGINATING_ENDPOINT, self.endpoint.as_str());

        let scope = TransactionScope::begin(Arc::clone(&self.store)).await?;
        if let Err(err) = self
            .transport
            .send(scope.id(), &self.destination, message)
            .await
        {
            return Err(scope.abort(err).await);
        }
        scope.commit().await
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(destination = %self.destination, "heartbeat loop started");

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.beat().await {
                        warn!(error = %err, "heartbeat failed");
                    }
                }
            }
        }
        debug!("heartbeat loop stopped");
    }
}

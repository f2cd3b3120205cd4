//! Transport backed by the durable store itself.
//!
//! Queues live in the same store as attempts and subscriptions, so a send
//! made under the receiving transaction commits or rolls back with it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{EndpointAddress, Message, TransactionId};
use crate::error::{CourierError, Result};
use crate::ports::{DurableStore, Transport};

pub struct StoreTransport {
    store: Arc<dyn DurableStore>,
}

impl StoreTransport {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }
}

/// Connectivity failures surface as transport failures to callers of this adapter.
fn as_transport_error(err: CourierError) -> CourierError {
    match err {
        CourierError::StoreUnavailable(reason) => CourierError::TransportUnavailable(reason),
        other => other,
    }
}

#[async_trait]
impl Transport for StoreTransport {
    async fn send(
        &self,
        txn: TransactionId,
        destination: &EndpointAddress,
        message: Message,
    ) -> Result<()> {
        self.store
            .enqueue(txn, destination, message, None)
            .await
            .map_err(as_transport_error)
    }

    async fn defer(
        &self,
        txn: TransactionId,
        destination: &EndpointAddress,
        message: Message,
        deliver_at: DateTime<Utc>,
    ) -> Result<()> {
        self.store
            .enqueue(txn, destination, message, Some(deliver_at))
            .await
            .map_err(as_transport_error)
    }

    async fn receive(
        &self,
        txn: TransactionId,
        queue: &EndpointAddress,
    ) -> Result<Option<Message>> {
        self.store
            .dequeue(txn, queue)
            .await
            .map_err(as_transport_error)
    }

    async fn wait_for_message(&self, queue: &EndpointAddress, timeout: Duration) {
        self.store.wait_for_message(queue, timeout).await;
    }
}

//! Transport port.
//!
//! A thin send/receive surface sharing the store's transaction handle. When
//! transport and store are the same physical resource (see
//! `impls::StoreTransport`), sends commit atomically with the receive.
//! Coordinating two different resources is left to the implementation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{EndpointAddress, Message, TransactionId};
use crate::error::Result;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        txn: TransactionId,
        destination: &EndpointAddress,
        message: Message,
    ) -> Result<()>;

    /// Send that becomes visible at `deliver_at` instead of on commit.
    async fn defer(
        &self,
        txn: TransactionId,
        destination: &EndpointAddress,
        message: Message,
        deliver_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn receive(&self, txn: TransactionId, queue: &EndpointAddress)
    -> Result<Option<Message>>;

    /// Long-poll until `queue` may hold an eligible message.
    async fn wait_for_message(&self, queue: &EndpointAddress, timeout: Duration);
}

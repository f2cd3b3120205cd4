//! DurableStore port: the source of truth for queues, subscriptions and
//! delivery attempts.
//!
//! Queue operations are transactional. Everything written under one
//! `TransactionId` (receive, outgoing enqueues, audit/dead-letter copies)
//! becomes visible on `commit` or disappears on `rollback` as one unit.
//! Subscriptions and attempt records are written directly.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    AttemptOutcome, DeliveryAttempt, EndpointAddress, Message, MessageId, MessageType,
    TransactionId,
};
use crate::error::Result;

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Open a transaction.
    async fn begin(&self) -> Result<TransactionId>;

    /// Apply every staged write of `txn` and release its locks.
    async fn commit(&self, txn: TransactionId) -> Result<()>;

    /// Discard staged writes and return received messages to their queue.
    async fn rollback(&self, txn: TransactionId) -> Result<()>;

    /// Mark the current point of `txn`; see [`DurableStore::rollback_to_savepoint`].
    async fn savepoint(&self, txn: TransactionId) -> Result<()>;

    /// Drop writes staged after the last savepoint. Receives are kept.
    async fn rollback_to_savepoint(&self, txn: TransactionId) -> Result<()>;

    /// Stage `message` for `queue`. With `deliver_at` the message stays
    /// invisible to receivers until that time.
    async fn enqueue(
        &self,
        txn: TransactionId,
        queue: &EndpointAddress,
        message: Message,
        deliver_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Take the oldest eligible message of `queue` and lock it to `txn`.
    ///
    /// A locked message is invisible to every other transaction until
    /// `txn` commits (message removed) or rolls back (message unlocked).
    async fn dequeue(&self, txn: TransactionId, queue: &EndpointAddress)
    -> Result<Option<Message>>;

    async fn upsert_subscription(
        &self,
        event_type: &MessageType,
        endpoint: &EndpointAddress,
    ) -> Result<()>;

    async fn remove_subscription(
        &self,
        event_type: &MessageType,
        endpoint: &EndpointAddress,
    ) -> Result<()>;

    async fn subscribers(&self, event_type: &MessageType) -> Result<BTreeSet<EndpointAddress>>;

    /// Update the attempt history of a message as received from `queue`.
    ///
    /// Returns the record after the update, or `None` once it was deleted
    /// (`Succeeded` / `DeadLettered`).
    async fn record_attempt(
        &self,
        queue: &EndpointAddress,
        message_id: MessageId,
        outcome: AttemptOutcome,
    ) -> Result<Option<DeliveryAttempt>>;

    async fn delivery_attempt(
        &self,
        queue: &EndpointAddress,
        message_id: MessageId,
    ) -> Result<Option<DeliveryAttempt>>;

    /// Number of committed messages in `queue`, locked or deferred included.
    async fn queue_depth(&self, queue: &EndpointAddress) -> Result<usize>;

    /// Wait until `queue` may have an eligible message, at most `timeout`.
    ///
    /// Stores without change notification simply sleep.
    async fn wait_for_message(&self, _queue: &EndpointAddress, timeout: Duration) {
        tokio::time::sleep(timeout).await;
    }
}

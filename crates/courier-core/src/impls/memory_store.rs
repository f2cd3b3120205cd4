//! In-memory transactional store.
//!
//! Mirrors what a relational backing store does with row locks: a dequeued
//! row stays in its queue, locked to the receiving transaction, until the
//! transaction commits (row deleted) or rolls back (row unlocked in place).
//! Enqueues are staged per transaction and only land in a queue on commit.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace};

use crate::domain::{
    AttemptOutcome, DeliveryAttempt, EndpointAddress, Message, MessageId, MessageType,
    Subscription, TransactionId,
};
use crate::error::{CourierError, Result};
use crate::ports::{Clock, DurableStore, SystemClock};

/// A committed row of a queue.
#[derive(Debug, Clone)]
struct QueuedRow {
    message: Message,
    deliver_at: Option<DateTime<Utc>>,
    locked_by: Option<TransactionId>,
}

impl QueuedRow {
    fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.locked_by.is_none() && self.deliver_at.is_none_or(|at| at <= now)
    }
}

#[derive(Debug)]
struct StagedEnqueue {
    queue: EndpointAddress,
    message: Message,
    deliver_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct TransactionState {
    /// Rows locked by this transaction: (queue, sequence number).
    received: Vec<(EndpointAddress, u64)>,
    staged: Vec<StagedEnqueue>,
    /// Length of `staged` at the last savepoint.
    savepoint: usize,
}

struct InMemoryStoreState {
    /// Queue rows keyed by a store-wide sequence, so iteration is FIFO.
    queues: HashMap<EndpointAddress, BTreeMap<u64, QueuedRow>>,
    next_seq: u64,
    transactions: HashMap<TransactionId, TransactionState>,
    subscriptions: HashMap<MessageType, BTreeSet<EndpointAddress>>,
    /// Attempt histories keyed by (receiving queue, message id).
    attempts: HashMap<(EndpointAddress, MessageId), DeliveryAttempt>,
    available: bool,
    subscription_reads: u64,
}

impl InMemoryStoreState {
    fn new() -> Self {
        Self {
            queues: HashMap::new(),
            next_seq: 1,
            transactions: HashMap::new(),
            subscriptions: HashMap::new(),
            attempts: HashMap::new(),
            available: true,
            subscription_reads: 0,
        }
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(CourierError::StoreUnavailable(
                "in-memory store is offline".to_string(),
            ))
        }
    }

    fn transaction_mut(&mut self, txn: TransactionId) -> Result<&mut TransactionState> {
        self.transactions
            .get_mut(&txn)
            .ok_or_else(|| CourierError::TransactionNotFound(txn.to_string()))
    }

    fn push_row(&mut self, staged: StagedEnqueue) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queues.entry(staged.queue).or_default().insert(
            seq,
            QueuedRow {
                message: staged.message,
                deliver_at: staged.deliver_at,
                locked_by: None,
            },
        );
    }

    /// Earliest deferred delivery among unlocked rows of `queue`.
    fn next_deferred(&self, queue: &EndpointAddress) -> Option<DateTime<Utc>> {
        self.queues.get(queue).and_then(|rows| {
            rows.values()
                .filter(|row| row.locked_by.is_none())
                .filter_map(|row| row.deliver_at)
                .min()
        })
    }
}

/// In-memory [`DurableStore`].
pub struct InMemoryStore {
    state: Arc<Mutex<InMemoryStoreState>>,
    notify: Arc<Notify>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryStoreState::new())),
            notify: Arc::new(Notify::new()),
            clock,
        }
    }

    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Simulate losing (or regaining) the connection to the store.
    pub async fn set_available(&self, available: bool) {
        self.state.lock().await.available = available;
        if available {
            self.notify.notify_waiters();
        }
    }

    /// Committed messages of `queue` in FIFO order, locked or deferred included.
    pub async fn messages(&self, queue: &EndpointAddress) -> Vec<Message> {
        let state = self.state.lock().await;
        state
            .queues
            .get(queue)
            .map(|rows| rows.values().map(|row| row.message.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn subscriptions(&self) -> Vec<Subscription> {
        let state = self.state.lock().await;
        let mut all: Vec<Subscription> = state
            .subscriptions
            .iter()
            .flat_map(|(event_type, endpoints)| {
                endpoints
                    .iter()
                    .map(move |endpoint| Subscription::new(event_type.clone(), endpoint.clone()))
            })
            .collect();
        all.sort();
        all
    }

    /// How many times `subscribers` hit the store.
    pub async fn subscription_reads(&self) -> u64 {
        self.state.lock().await.subscription_reads
    }

    pub async fn open_transactions(&self) -> usize {
        self.state.lock().await.transactions.len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_system_clock()
    }
}

#[async_trait]
impl DurableStore for InMemoryStore {
    async fn begin(&self) -> Result<TransactionId> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        let txn = TransactionId::generate();
        state.transactions.insert(txn, TransactionState::default());
        trace!(%txn, "transaction opened");
        Ok(txn)
    }

    async fn commit(&self, txn: TransactionId) -> Result<()> {
        let delivered = {
            let mut state = self.state.lock().await;
            state.ensure_available()?;
            let tx = state
                .transactions
                .remove(&txn)
                .ok_or_else(|| CourierError::TransactionNotFound(txn.to_string()))?;

            for (queue, seq) in &tx.received {
                if let Some(rows) = state.queues.get_mut(queue) {
                    rows.remove(seq);
                }
            }
            let delivered = !tx.staged.is_empty();
            for staged in tx.staged {
                state.push_row(staged);
            }
            debug!(%txn, received = tx.received.len(), "transaction committed");
            delivered
        };

        if delivered {
            self.notify.notify_waiters();
        }
        Ok(())
    }

    async fn rollback(&self, txn: TransactionId) -> Result<()> {
        // Works while offline: a lost connection aborts the transaction anyway.
        let released = {
            let mut state = self.state.lock().await;
            let tx = state
                .transactions
                .remove(&txn)
                .ok_or_else(|| CourierError::TransactionNotFound(txn.to_string()))?;

            for (queue, seq) in &tx.received {
                if let Some(row) = state.queues.get_mut(queue).and_then(|rows| rows.get_mut(seq)) {
                    row.locked_by = None;
                }
            }
            debug!(%txn, released = tx.received.len(), "transaction rolled back");
            !tx.received.is_empty()
        };

        if released {
            self.notify.notify_waiters();
        }
        Ok(())
    }

    async fn savepoint(&self, txn: TransactionId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        let tx = state.transaction_mut(txn)?;
        tx.savepoint = tx.staged.len();
        Ok(())
    }

    async fn rollback_to_savepoint(&self, txn: TransactionId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        let tx = state.transaction_mut(txn)?;
        let keep = tx.savepoint;
        tx.staged.truncate(keep);
        Ok(())
    }

    async fn enqueue(
        &self,
        txn: TransactionId,
        queue: &EndpointAddress,
        message: Message,
        deliver_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        state.transaction_mut(txn)?.staged.push(StagedEnqueue {
            queue: queue.clone(),
            message,
            deliver_at,
        });
        Ok(())
    }

    async fn dequeue(
        &self,
        txn: TransactionId,
        queue: &EndpointAddress,
    ) -> Result<Option<Message>> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        if !state.transactions.contains_key(&txn) {
            return Err(CourierError::TransactionNotFound(txn.to_string()));
        }

        let Some(rows) = state.queues.get_mut(queue) else {
            return Ok(None);
        };
        let Some((seq, row)) = rows.iter_mut().find(|(_, row)| row.is_eligible(now)) else {
            return Ok(None);
        };

        row.locked_by = Some(txn);
        let seq = *seq;
        let message = row.message.clone();
        state.transaction_mut(txn)?.received.push((queue.clone(), seq));
        Ok(Some(message))
    }

    async fn upsert_subscription(
        &self,
        event_type: &MessageType,
        endpoint: &EndpointAddress,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        state
            .subscriptions
            .entry(event_type.clone())
            .or_default()
            .insert(endpoint.clone());
        Ok(())
    }

    async fn remove_subscription(
        &self,
        event_type: &MessageType,
        endpoint: &EndpointAddress,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        if let Some(endpoints) = state.subscriptions.get_mut(event_type) {
            endpoints.remove(endpoint);
            if endpoints.is_empty() {
                state.subscriptions.remove(event_type);
            }
        }
        Ok(())
    }

    async fn subscribers(&self, event_type: &MessageType) -> Result<BTreeSet<EndpointAddress>> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        state.subscription_reads += 1;
        Ok(state
            .subscriptions
            .get(event_type)
            .cloned()
            .unwrap_or_default())
    }

    async fn record_attempt(
        &self,
        queue: &EndpointAddress,
        message_id: MessageId,
        outcome: AttemptOutcome,
    ) -> Result<Option<DeliveryAttempt>> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        let key = (queue.clone(), message_id);
        match outcome {
            AttemptOutcome::Failed { reason } => {
                let attempt = state
                    .attempts
                    .entry(key)
                    .or_insert_with(|| DeliveryAttempt::new(queue.clone(), message_id));
                attempt.record_failure(reason);
                Ok(Some(attempt.clone()))
            }
            AttemptOutcome::RetryScheduled { eligible_at } => {
                let attempt = state
                    .attempts
                    .entry(key)
                    .or_insert_with(|| DeliveryAttempt::new(queue.clone(), message_id));
                attempt.next_eligible_at = Some(eligible_at);
                Ok(Some(attempt.clone()))
            }
            AttemptOutcome::Succeeded | AttemptOutcome::DeadLettered => {
                state.attempts.remove(&key);
                Ok(None)
            }
        }
    }

    async fn delivery_attempt(
        &self,
        queue: &EndpointAddress,
        message_id: MessageId,
    ) -> Result<Option<DeliveryAttempt>> {
        let state = self.state.lock().await;
        state.ensure_available()?;
        Ok(state.attempts.get(&(queue.clone(), message_id)).cloned())
    }

    async fn queue_depth(&self, queue: &EndpointAddress) -> Result<usize> {
        let state = self.state.lock().await;
        state.ensure_available()?;
        Ok(state.queues.get(queue).map_or(0, BTreeMap::len))
    }

    async fn wait_for_message(&self, queue: &EndpointAddress, timeout: Duration) {
        // Register interest before inspecting state so a commit in between
        // is not missed.
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let wait = {
            let now = self.clock.now();
            let state = self.state.lock().await;
            let ready = state.available
                && state
                    .queues
                    .get(queue)
                    .is_some_and(|rows| rows.values().any(|row| row.is_eligible(now)));
            if ready {
                return;
            }
            match state.next_deferred(queue) {
                Some(at) => (at - now).to_std().unwrap_or(Duration::ZERO).min(timeout),
                None => timeout,
            }
        };

        tokio::select! {
            _ = &mut notified => {},
            _ = tokio::time::sleep(wait) => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageType;
    use crate::impls::ManualClock;

    fn message(tag: &str) -> Message {
        Message::new(MessageType::new(tag), b"{}".to_vec(), Utc::now())
    }

    fn q(name: &str) -> EndpointAddress {
        EndpointAddress::new(name)
    }

    async fn enqueue_committed(store: &InMemoryStore, queue: &str, msg: Message) {
        let txn = store.begin().await.unwrap();
        store.enqueue(txn, &q(queue), msg, None).await.unwrap();
        store.commit(txn).await.unwrap();
    }

    #[tokio::test]
    async fn enqueue_is_invisible_until_commit() {
        let store = InMemoryStore::default();
        let txn = store.begin().await.unwrap();
        store.enqueue(txn, &q("in"), message("a"), None).await.unwrap();

        assert_eq!(store.queue_depth(&q("in")).await.unwrap(), 0);
        store.commit(txn).await.unwrap();
        assert_eq!(store.queue_depth(&q("in")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rollback_discards_staged_and_unlocks_received() {
        let store = InMemoryStore::default();
        let msg = message("a");
        enqueue_committed(&store, "in", msg.clone()).await;

        let txn = store.begin().await.unwrap();
        let got = store.dequeue(txn, &q("in")).await.unwrap().unwrap();
        assert_eq!(got.id(), msg.id());
        store.enqueue(txn, &q("out"), message("b"), None).await.unwrap();
        store.rollback(txn).await.unwrap();

        assert_eq!(store.queue_depth(&q("out")).await.unwrap(), 0);
        let txn = store.begin().await.unwrap();
        let again = store.dequeue(txn, &q("in")).await.unwrap().unwrap();
        assert_eq!(again.id(), msg.id());
        store.commit(txn).await.unwrap();
        assert_eq!(store.queue_depth(&q("in")).await.unwrap(), 0);
        assert_eq!(store.open_transactions().await, 0);
    }

    #[tokio::test]
    async fn locked_message_is_invisible_to_other_transactions() {
        let store = InMemoryStore::default();
        enqueue_committed(&store, "in", message("a")).await;

        let first = store.begin().await.unwrap();
        let second = store.begin().await.unwrap();
        assert!(store.dequeue(first, &q("in")).await.unwrap().is_some());
        assert!(store.dequeue(second, &q("in")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_dequeues_never_share_a_message() {
        let store = Arc::new(InMemoryStore::default());
        for i in 0..20 {
            enqueue_committed(&store, "in", message(&format!("m{i}"))).await;
        }

        let mut joins = Vec::new();
        for _ in 0..40 {
            let store = Arc::clone(&store);
            joins.push(tokio::spawn(async move {
                let txn = store.begin().await.unwrap();
                store.dequeue(txn, &q("in")).await.unwrap().map(|m| m.id())
            }));
        }

        let mut seen = BTreeSet::new();
        for join in joins {
            if let Some(id) = join.await.unwrap() {
                assert!(seen.insert(id), "message {id} dequeued twice");
            }
        }
        assert_eq!(seen.len(), 20);
    }

    #[tokio::test]
    async fn savepoint_rollback_keeps_receive_and_earlier_writes() {
        let store = InMemoryStore::default();
        enqueue_committed(&store, "in", message("a")).await;

        let txn = store.begin().await.unwrap();
        store.dequeue(txn, &q("in")).await.unwrap().unwrap();
        store.enqueue(txn, &q("before"), message("b"), None).await.unwrap();
        store.savepoint(txn).await.unwrap();
        store.enqueue(txn, &q("after"), message("c"), None).await.unwrap();
        store.rollback_to_savepoint(txn).await.unwrap();
        store.commit(txn).await.unwrap();

        assert_eq!(store.queue_depth(&q("in")).await.unwrap(), 0);
        assert_eq!(store.queue_depth(&q("before")).await.unwrap(), 1);
        assert_eq!(store.queue_depth(&q("after")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn deferred_message_becomes_eligible_at_deliver_at() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = InMemoryStore::new(clock.clone());
        let at = clock.now() + chrono::Duration::seconds(30);

        let txn = store.begin().await.unwrap();
        store.enqueue(txn, &q("in"), message("a"), Some(at)).await.unwrap();
        store.commit(txn).await.unwrap();

        let txn = store.begin().await.unwrap();
        assert!(store.dequeue(txn, &q("in")).await.unwrap().is_none());
        clock.advance(Duration::from_secs(30));
        assert!(store.dequeue(txn, &q("in")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn offline_store_rejects_work_but_still_rolls_back() {
        let store = InMemoryStore::default();
        enqueue_committed(&store, "in", message("a")).await;

        let txn = store.begin().await.unwrap();
        store.dequeue(txn, &q("in")).await.unwrap().unwrap();
        store.set_available(false).await;

        let err = store.commit(txn).await.unwrap_err();
        assert!(err.is_infrastructure());
        assert!(matches!(store.begin().await, Err(CourierError::StoreUnavailable(_))));
        store.rollback(txn).await.unwrap();

        store.set_available(true).await;
        let txn = store.begin().await.unwrap();
        assert!(store.dequeue(txn, &q("in")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn attempts_accumulate_and_are_deleted_on_terminal_outcomes() {
        let store = InMemoryStore::default();
        let id = MessageId::generate();
        let input = q("in");

        let first = store
            .record_attempt(&input, id, AttemptOutcome::Failed { reason: "a".into() })
            .await
            .unwrap()
            .unwrap();
        let second = store
            .record_attempt(&input, id, AttemptOutcome::Failed { reason: "b".into() })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.attempts, 1);
        assert_eq!(second.attempts, 2);
        assert_eq!(second.last_failure.as_deref(), Some("b"));

        let gone = store
            .record_attempt(&input, id, AttemptOutcome::DeadLettered)
            .await
            .unwrap();
        assert!(gone.is_none());
        assert!(store.delivery_attempt(&input, id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn attempts_are_tracked_per_receiving_queue() {
        let store = InMemoryStore::default();
        let id = MessageId::generate();

        for _ in 0..2 {
            store
                .record_attempt(&q("billing"), id, AttemptOutcome::Failed { reason: "x".into() })
                .await
                .unwrap();
        }
        let shipping = store
            .record_attempt(&q("shipping"), id, AttemptOutcome::Failed { reason: "y".into() })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(shipping.attempts, 1);
        assert_eq!(shipping.queue, q("shipping"));

        store
            .record_attempt(&q("shipping"), id, AttemptOutcome::Succeeded)
            .await
            .unwrap();
        let billing = store.delivery_attempt(&q("billing"), id).await.unwrap().unwrap();
        assert_eq!(billing.attempts, 2);
        assert!(store.delivery_attempt(&q("shipping"), id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn subscriptions_upsert_is_idempotent() {
        let store = InMemoryStore::default();
        let event = MessageType::new("acme.order.placed.v1");

        store.upsert_subscription(&event, &q("billing")).await.unwrap();
        store.upsert_subscription(&event, &q("billing")).await.unwrap();
        store.upsert_subscription(&event, &q("shipping")).await.unwrap();
        assert_eq!(store.subscribers(&event).await.unwrap().len(), 2);

        store.remove_subscription(&event, &q("billing")).await.unwrap();
        let left = store.subscribers(&event).await.unwrap();
        assert_eq!(left.into_iter().collect::<Vec<_>>(), vec![q("shipping")]);
        assert_eq!(store.subscriptions().await.len(), 1);
    }

    #[tokio::test]
    async fn wait_for_message_wakes_on_commit() {
        let store = Arc::new(InMemoryStore::default());
        let waiter = tokio::spawn({
            let store = Arc::clone(&store);
            async move {
                let start = std::time::Instant::now();
                store.wait_for_message(&q("in"), Duration::from_secs(5)).await;
                start.elapsed()
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        enqueue_committed(&store, "in", message("a")).await;
        let waited = waiter.await.unwrap();
        assert!(waited < Duration::from_secs(5));
    }
}

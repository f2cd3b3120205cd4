//! Subscription cache: event type -> subscriber endpoints, with a TTL.
//!
//! An expired entry is refreshed by the resolve that finds it, and that
//! call waits for the store. Empty results are cached like any other.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::{EndpointAddress, MessageType};
use crate::error::Result;
use crate::ports::{Clock, DurableStore};

struct CacheEntry {
    endpoints: BTreeSet<EndpointAddress>,
    fetched_at: DateTime<Utc>,
}

pub struct SubscriptionCache {
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    entries: RwLock<HashMap<MessageType, CacheEntry>>,
}

impl SubscriptionCache {
    pub fn new(store: Arc<dyn DurableStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            store,
            clock,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn resolve(&self, event_type: &MessageType) -> Result<BTreeSet<EndpointAddress>> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(event_type)
                && self.is_fresh(entry, self.clock.now())
            {
                return Ok(entry.endpoints.clone());
            }
        }

        let mut entries = self.entries.write().await;
        // another caller may have refreshed while we waited for the write lock
        let now = self.clock.now();
        if let Some(entry) = entries.get(event_type)
            && self.is_fresh(entry, now)
        {
            return Ok(entry.endpoints.clone());
        }

        let endpoints = self.store.subscribers(event_type).await?;
        debug!(%event_type, subscribers = endpoints.len(), "subscription cache refreshed");
        entries.insert(
            event_type.clone(),
            CacheEntry {
                endpoints: endpoints.clone(),
                fetched_at: now,
            },
        );
        Ok(endpoints)
    }

    /// Drop the cached entry so the next resolve reads the store.
    pub async fn invalidate(&self, event_type: &MessageType) {
        self.entries.write().await.remove(event_type);
    }

    fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        match (now - entry.fetched_at).to_std() {
            Ok(age) => age <= self.ttl,
            // clock went backwards
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryStore, ManualClock};

    const EVENT: &str = "test.sales.order_placed.v1";

    fn setup(ttl: Duration) -> (Arc<InMemoryStore>, Arc<ManualClock>, SubscriptionCache) {
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let cache = SubscriptionCache::new(store.clone(), clock.clone(), ttl);
        (store, clock, cache)
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let (store, clock, cache) = setup(Duration::from_secs(300));
        let event = MessageType::new(EVENT);
        store
            .upsert_subscription(&event, &EndpointAddress::new("shipping"))
            .await
            .unwrap();

        let first = cache.resolve(&event).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(store.subscription_reads().await, 1);

        clock.advance(Duration::from_secs(240));
        store
            .upsert_subscription(&event, &EndpointAddress::new("billing"))
            .await
            .unwrap();
        assert_eq!(cache.resolve(&event).await.unwrap().len(), 1);
        assert_eq!(store.subscription_reads().await, 1);

        clock.advance(Duration::from_secs(120));
        assert_eq!(cache.resolve(&event).await.unwrap().len(), 2);
        assert_eq!(store.subscription_reads().await, 2);
    }

    #[tokio::test]
    async fn empty_results_are_cached() {
        let (store, _clock, cache) = setup(Duration::from_secs(60));
        let event = MessageType::new(EVENT);

        assert!(cache.resolve(&event).await.unwrap().is_empty());
        assert!(cache.resolve(&event).await.unwrap().is_empty());
        assert_eq!(store.subscription_reads().await, 1);
    }

    #[tokio::test]
    async fn invalidate_forces_a_store_read() {
        let (store, _clock, cache) = setup(Duration::from_secs(60));
        let event = MessageType::new(EVENT);

        cache.resolve(&event).await.unwrap();
        store
            .upsert_subscription(&event, &EndpointAddress::new("shipping"))
            .await
            .unwrap();
        cache.invalidate(&event).await;

        assert_eq!(cache.resolve(&event).await.unwrap().len(), 1);
        assert_eq!(store.subscription_reads().await, 2);
    }

    #[tokio::test]
    async fn store_outage_is_surfaced() {
        let (store, _clock, cache) = setup(Duration::from_secs(60));
        store.set_available(false).await;

        let err = cache.resolve(&MessageType::new(EVENT)).await.unwrap_err();
        assert!(err.is_infrastructure());
    }
}

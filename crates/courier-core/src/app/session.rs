//! Sending and subscribing from outside a handler.

use std::sync::Arc;

use tracing::info;

use crate::app::outgoing::Outgoing;
use crate::app::transaction::TransactionScope;
use crate::domain::{EndpointAddress, MessageType};
use crate::error::Result;
use crate::ports::DurableStore;
use crate::typed::TypedMessage;

/// Each operation runs in a transaction of its own.
#[derive(Clone)]
pub struct MessageSession {
    store: Arc<dyn DurableStore>,
    outgoing: Arc<Outgoing>,
}

impl MessageSession {
    pub fn new(store: Arc<dyn DurableStore>, outgoing: Arc<Outgoing>) -> Self {
        Self { store, outgoing }
    }

    pub fn endpoint(&self) -> &EndpointAddress {
        self.outgoing.endpoint()
    }

    pub async fn send<M: TypedMessage>(&self, message: &M) -> Result<()> {
        let scope = TransactionScope::begin(Arc::clone(&self.store)).await?;
        match self.outgoing.send(scope.id(), message, None).await {
            Ok(()) => scope.commit().await,
            Err(err) => Err(scope.abort(err).await),
        }
    }

    pub async fn send_to<M: TypedMessage>(
        &self,
        destination: &EndpointAddress,
        message: &M,
    ) -> Result<()> {
        let scope = TransactionScope::begin(Arc::clone(&self.store)).await?;
        match self
            .outgoing
            .send_to(scope.id(), destination, message, None)
            .await
        {
            Ok(()) => scope.commit().await,
            Err(err) => Err(scope.abort(err).await),
        }
    }

    pub async fn send_local<M: TypedMessage>(&self, message: &M) -> Result<()> {
        let own = self.outgoing.endpoint().clone();
        self.send_to(&own, message).await
    }

    pub async fn publish<M: TypedMessage>(&self, event: &M) -> Result<usize> {
        let scope = TransactionScope::begin(Arc::clone(&self.store)).await?;
        match self.outgoing.publish(scope.id(), event, None).await {
            Ok(sent) => {
                scope.commit().await?;
                Ok(sent)
            }
            Err(err) => Err(scope.abort(err).await),
        }
    }

    /// Subscribe this endpoint to `M`.
    pub async fn subscribe<M: TypedMessage>(&self) -> Result<()> {
        self.subscribe_type(&MessageType::new(M::TYPE)).await
    }

    pub async fn subscribe_type(&self, event_type: &MessageType) -> Result<()> {
        self.store
            .upsert_subscription(event_type, self.outgoing.endpoint())
            .await?;
        self.outgoing.subscriptions().invalidate(event_type).await;
        info!(%event_type, endpoint = %self.outgoing.endpoint(), "subscribed");
        Ok(())
    }

    pub async fn unsubscribe<M: TypedMessage>(&self) -> Result<()> {
        let event_type = MessageType::new(M::TYPE);
        self.store
            .remove_subscription(&event_type, self.outgoing.endpoint())
            .await?;
        self.outgoing.subscriptions().invalidate(&event_type).await;
        info!(%event_type, endpoint = %self.outgoing.endpoint(), "unsubscribed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::routing::Router;
    use crate::error::CourierError;
    use crate::impls::{InMemoryStore, ManualClock, StoreTransport};
    use crate::subscriptions::SubscriptionCache;
    use crate::typed::message::fixtures::{ChargeCard, OrderPlaced, PlaceOrder};
    use chrono::DateTime;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn session(name: &str, store: Arc<InMemoryStore>, clock: Arc<ManualClock>) -> MessageSession {
        let mut routes = BTreeMap::new();
        routes.insert(MessageType::new(PlaceOrder::TYPE), EndpointAddress::new("sales"));
        let cache = Arc::new(SubscriptionCache::new(
            store.clone(),
            clock.clone(),
            Duration::from_secs(300),
        ));
        let outgoing = Arc::new(Outgoing::new(
            EndpointAddress::new(name),
            Arc::new(StoreTransport::new(store.clone())),
            Router::new(routes),
            cache,
            clock,
        ));
        MessageSession::new(store, outgoing)
    }

    fn fixture() -> (Arc<InMemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(DateTime::from_timestamp(0, 0).unwrap()));
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        (store, clock)
    }

    #[tokio::test]
    async fn unsubscribe_takes_effect_before_the_cache_expires() {
        let (store, clock) = fixture();
        let billing = session("billing", store.clone(), clock.clone());

        billing.subscribe::<OrderPlaced>().await.unwrap();
        // first publish fills the subscription cache
        assert_eq!(billing.publish(&OrderPlaced { order_id: 1 }).await.unwrap(), 1);

        billing.unsubscribe::<OrderPlaced>().await.unwrap();
        clock.advance(Duration::from_secs(1));
        assert_eq!(billing.publish(&OrderPlaced { order_id: 2 }).await.unwrap(), 0);

        let delivered = store.messages(&EndpointAddress::new("billing")).await;
        assert_eq!(delivered.len(), 1);
        assert!(store.subscriptions().await.is_empty());
        assert_eq!(store.open_transactions().await, 0);
    }

    #[tokio::test]
    async fn send_uses_the_route_table() {
        let (store, clock) = fixture();
        let web = session("web", store.clone(), clock);

        web.send(&PlaceOrder { order_id: 7 }).await.unwrap();

        let sent = store.messages(&EndpointAddress::new("sales")).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message_type(), &MessageType::new(PlaceOrder::TYPE));
        assert_eq!(
            sent[0].header(crate::domain::headers::ORIGINATING_ENDPOINT),
            Some("web")
        );
    }

    #[tokio::test]
    async fn unrouted_send_fails_and_commits_nothing() {
        let (store, clock) = fixture();
        let web = session("web", store.clone(), clock);

        let err = web.send(&ChargeCard { amount: 3 }).await.unwrap_err();
        assert!(matches!(err, CourierError::NoRoute(_)));
        assert_eq!(store.open_transactions().await, 0);
        assert!(store.messages(&EndpointAddress::new("sales")).await.is_empty());
        assert!(store.messages(&EndpointAddress::new("web")).await.is_empty());
    }

    #[tokio::test]
    async fn send_to_addresses_an_explicit_queue() {
        let (store, clock) = fixture();
        let web = session("web", store.clone(), clock);

        web.send_to(&EndpointAddress::new("billing"), &ChargeCard { amount: 9 })
            .await
            .unwrap();

        assert_eq!(store.messages(&EndpointAddress::new("billing")).await.len(), 1);
    }
}

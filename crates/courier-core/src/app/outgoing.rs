//! Building and sending outgoing messages, shared by handler contexts and sessions.

use std::sync::Arc;

use crate::app::routing::Router;
use crate::domain::{EndpointAddress, Message, MessageId, MessageType, TransactionId, headers};
use crate::error::Result;
use crate::ports::{Clock, Transport};
use crate::subscriptions::SubscriptionCache;
use crate::typed::TypedMessage;

pub struct Outgoing {
    endpoint: EndpointAddress,
    transport: Arc<dyn Transport>,
    router: Router,
    subscriptions: Arc<SubscriptionCache>,
    clock: Arc<dyn Clock>,
}

impl Outgoing {
    pub fn new(
        endpoint: EndpointAddress,
        transport: Arc<dyn Transport>,
        router: Router,
        subscriptions: Arc<SubscriptionCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            endpoint,
            transport,
            router,
            subscriptions,
            clock,
        }
    }

    pub fn endpoint(&self) -> &EndpointAddress {
        &self.endpoint
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionCache> {
        &self.subscriptions
    }

    pub fn build<M: TypedMessage>(&self, body: &M, related_to: Option<MessageId>) -> Result<Message> {
        let mut message = Message::json(MessageType::new(M::TYPE), body, self.clock.now())?
            .header_set(headers::ORIGINATING_ENDPOINT, self.endpoint.as_str());
        if let Some(id) = related_to {
            message = message.header_set(headers::RELATED_TO, id.to_string());
        }
        Ok(message)
    }

    pub async fn send<M: TypedMessage>(
        &self,
        txn: TransactionId,
        body: &M,
        related_to: Option<MessageId>,
    ) -> Result<()> {
        let destination = self.router.route_for(&MessageType::new(M::TYPE))?.clone();
        self.send_to(txn, &destination, body, related_to).await
    }

    pub async fn send_to<M: TypedMessage>(
        &self,
        txn: TransactionId,
        destination: &EndpointAddress,
        body: &M,
        related_to: Option<MessageId>,
    ) -> Result<()> {
        let message = self.build(body, related_to)?;
        self.transport.send(txn, destination, message).await
    }

    /// Send one copy to every current subscriber; returns how many were sent.
    pub async fn publish<M: TypedMessage>(
        &self,
        txn: TransactionId,
        event: &M,
        related_to: Option<MessageId>,
    ) -> Result<usize> {
        let subscribers = self
            .subscriptions
            .resolve(&MessageType::new(M::TYPE))
            .await?;
        let message = self.build(event, related_to)?;
        for subscriber in &subscribers {
            self.transport.send(txn, subscriber, message.clone()).await?;
        }
        Ok(subscribers.len())
    }
}

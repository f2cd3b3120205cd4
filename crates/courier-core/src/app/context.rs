//! Per-message context handed to handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::app::outgoing::Outgoing;
use crate::domain::{EndpointAddress, Message, MessageId, MessageType, TransactionId};
use crate::error::Result;
use crate::typed::TypedMessage;

/// Everything sent through a context is enlisted in the receiving
/// transaction and becomes visible only when it commits.
pub struct HandlerContext {
    txn: TransactionId,
    incoming: Message,
    outgoing: Arc<Outgoing>,
}

impl HandlerContext {
    pub fn new(txn: TransactionId, incoming: Message, outgoing: Arc<Outgoing>) -> Self {
        Self {
            txn,
            incoming,
            outgoing,
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.incoming.id()
    }

    pub fn message_type(&self) -> &MessageType {
        self.incoming.message_type()
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        self.incoming.headers()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.incoming.header(name)
    }

    pub fn endpoint(&self) -> &EndpointAddress {
        self.outgoing.endpoint()
    }

    /// Send to the route configured for `M`; `NoRoute` if there is none.
    pub async fn send<M: TypedMessage>(&self, message: &M) -> Result<()> {
        self.outgoing
            .send(self.txn, message, Some(self.message_id()))
            .await
    }

    pub async fn send_to<M: TypedMessage>(&self, destination: &EndpointAddress, message: &M) -> Result<()> {
        self.outgoing
            .send_to(self.txn, destination, message, Some(self.message_id()))
            .await
    }

    /// Send to this endpoint's own input queue.
    pub async fn send_local<M: TypedMessage>(&self, message: &M) -> Result<()> {
        let own = self.outgoing.endpoint().clone();
        self.send_to(&own, message).await
    }

    /// Publish to all subscribers of `M`; returns the number of copies sent.
    pub async fn publish<M: TypedMessage>(&self, event: &M) -> Result<usize> {
        self.outgoing
            .publish(self.txn, event, Some(self.message_id()))
            .await
    }
}

//! HandlerRegistry: known message types and their ordered handlers.
//!
//! A type can be known without having handlers (registered with
//! `register_message`, e.g. for sending). Decoding looks at the known
//! types; dispatch looks at the handlers.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::codec::{JsonCodec, PayloadCodec};
use super::handler::{DynHandler, Handler, TypedHandler};
use super::message::{MessageKind, TypedMessage};
use crate::domain::{Message, MessageType};
use crate::error::{CourierError, Result};

struct KnownType {
    kind: MessageKind,
    codec: Arc<dyn PayloadCodec>,
}

#[derive(Default)]
pub struct HandlerRegistry {
    known: HashMap<MessageType, KnownType>,
    handlers: HashMap<MessageType, Vec<Arc<dyn DynHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `M` decodable without registering a handler for it.
    pub fn register_message<M: TypedMessage>(&mut self) {
        self.known
            .entry(MessageType::new(M::TYPE))
            .or_insert_with(|| KnownType {
                kind: M::KIND,
                codec: Arc::new(JsonCodec::<M>::new()),
            });
    }

    /// Append `handler` to the handlers of `M`. Handlers run in registration order.
    pub fn register<M: TypedMessage, H: Handler<M> + 'static>(&mut self, handler: H) -> Result<()> {
        let message_type = MessageType::new(M::TYPE);
        let name = std::any::type_name::<H>();
        let handlers = self.handlers.entry(message_type.clone()).or_default();
        if handlers.iter().any(|h| h.name() == name) {
            return Err(CourierError::DuplicateHandler(message_type));
        }
        handlers.push(Arc::new(TypedHandler::new(handler)));
        self.register_message::<M>();
        Ok(())
    }

    /// Parse the payload of `message`. Unknown type tags and payloads that do not
    /// decode as their type are `MalformedMessage`.
    pub fn decode(&self, message: &Message) -> Result<serde_json::Value> {
        let Some(known) = self.known.get(message.message_type()) else {
            return Err(CourierError::MalformedMessage(format!(
                "unrecognized message type '{}'",
                message.message_type()
            )));
        };
        known.codec.decode(message.payload())
    }

    pub fn handlers_for(&self, message_type: &MessageType) -> &[Arc<dyn DynHandler>] {
        self.handlers
            .get(message_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_known(&self, message_type: &MessageType) -> bool {
        self.known.contains_key(message_type)
    }

    pub fn registered_types(&self) -> BTreeSet<MessageType> {
        self.known.keys().cloned().collect()
    }

    /// Event types with at least one handler; these are what an endpoint subscribes to.
    pub fn handled_events(&self) -> BTreeSet<MessageType> {
        self.handlers
            .iter()
            .filter(|(t, hs)| {
                !hs.is_empty()
                    && self
                        .known
                        .get(*t)
                        .is_some_and(|k| k.kind == MessageKind::Event)
            })
            .map(|(t, _)| t.clone())
            .collect()
    }

    /// Fail if any of `expected` is not a registered type.
    pub fn ensure_known<'a>(&self, expected: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let missing: Vec<String> = expected
            .into_iter()
            .filter(|t| !self.known.contains_key(&MessageType::new(*t)))
            .map(str::to_string)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(CourierError::MissingMessageTypes(missing))
        }
    }
}

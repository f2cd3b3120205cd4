//! Handlers and their type-erased form.
//!
//! - `Handler<M>`: what users implement, typed on the message.
//! - `DynHandler`: object-safe, stored by the registry per type tag.
//! - `TypedHandler<M, H>`: adapts the former to the latter.

use std::marker::PhantomData;

use async_trait::async_trait;

use super::message::TypedMessage;
use crate::app::context::HandlerContext;
use crate::error::{CourierError, Result};

/// Handles one message type. Runs inside the receiving transaction: anything
/// sent through `ctx` is committed only if every handler for the message succeeds.
///
/// ```ignore
/// struct ShipOrder;
///
/// #[async_trait]
/// impl Handler<OrderPlaced> for ShipOrder {
///     async fn handle(&self, message: OrderPlaced, ctx: &HandlerContext) -> Result<(), CourierError> {
///         ctx.send(&Ship { order_id: message.order_id }).await
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<M: TypedMessage>: Send + Sync {
    async fn handle(&self, message: M, ctx: &HandlerContext) -> Result<(), CourierError>;
}

#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, payload: serde_json::Value, ctx: &HandlerContext) -> Result<()>;
    fn message_type(&self) -> &'static str;
    fn name(&self) -> &'static str;
}

pub struct TypedHandler<M: TypedMessage, H: Handler<M>> {
    handler: H,
    _marker: PhantomData<fn() -> M>,
}

impl<M: TypedMessage, H: Handler<M>> TypedHandler<M, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<M: TypedMessage, H: Handler<M> + 'static> DynHandler for TypedHandler<M, H> {
    async fn handle_dyn(&self, payload: serde_json::Value, ctx: &HandlerContext) -> Result<()> {
        let message: M = serde_json::from_value(payload)
            .map_err(|e| CourierError::MalformedMessage(format!("json decode: {e}")))?;
        self.handler.handle(message, ctx).await
    }

    fn message_type(&self) -> &'static str {
        M::TYPE
    }

    fn name(&self) -> &'static str {
        std::any::type_name::<H>()
    }
}

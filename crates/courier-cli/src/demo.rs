//! Demo message and handler run by the binary.

use async_trait::async_trait;
use courier_core::{CourierError, Handler, HandlerContext, MessageKind, TypedMessage};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub text: String,
}

impl TypedMessage for MessageEvent {
    const TYPE: &'static str = "courier.demo.message_event.v1";
    const KIND: MessageKind = MessageKind::Event;
}

/// Only logs; runs inside the receiving transaction like any handler.
pub struct MessageEventHandler;

#[async_trait]
impl Handler<MessageEvent> for MessageEventHandler {
    async fn handle(&self, message: MessageEvent, ctx: &HandlerContext) -> Result<(), CourierError> {
        info!(message_id = %ctx.message_id(), text = %message.text, "message received");
        Ok(())
    }
}

//! Payload codecs: validate a raw payload against its registered type
//! before any handler sees it.

use std::marker::PhantomData;

use serde::Deserialize;

use super::message::TypedMessage;
use crate::error::{CourierError, Result};

pub trait PayloadCodec: Send + Sync {
    /// Parse `payload` and check it decodes as the registered type.
    fn decode(&self, payload: &[u8]) -> Result<serde_json::Value>;
}

pub struct JsonCodec<M> {
    _marker: PhantomData<fn() -> M>,
}

impl<M> JsonCodec<M> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<M> Default for JsonCodec<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: TypedMessage> PayloadCodec for JsonCodec<M> {
    fn decode(&self, payload: &[u8]) -> Result<serde_json::Value> {
        let value: serde_json::Value = serde_json::from_slice(payload).map_err(|e| {
            CourierError::MalformedMessage(format!("payload of {} is not json: {e}", M::TYPE))
        })?;
        M::deserialize(&value).map_err(|e| {
            CourierError::MalformedMessage(format!("payload does not decode as {}: {e}", M::TYPE))
        })?;
        Ok(value)
    }
}

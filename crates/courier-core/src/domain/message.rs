//! Message, message type tag and endpoint addressing.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MessageId;

/// Well-known header names written by the runtime.
pub mod headers {
    pub const FAILURE_REASON: &str = "courier.failure.reason";
    pub const FAILURE_ATTEMPTS: &str = "courier.failure.attempts";
    pub const FAILURE_QUEUE: &str = "courier.failure.queue";
    pub const FAILURE_TIME: &str = "courier.failure.time";
    pub const FAILURE_KIND: &str = "courier.failure.kind";

    pub const AUDIT_OUTCOME: &str = "courier.audit.outcome";
    pub const AUDIT_ENDPOINT: &str = "courier.audit.endpoint";
    pub const AUDIT_TIME: &str = "courier.audit.time";

    pub const ORIGINATING_ENDPOINT: &str = "courier.originating_endpoint";
    pub const RELATED_TO: &str = "courier.related_to";
    pub const DELAYED_ROUND: &str = "courier.retry.delayed_round";
}

/// Type tag of a message, e.g. `acme.billing.charge.v1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageType(String);

impl MessageType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Name of an endpoint; doubles as the name of its input queue.
///
/// Audit, error, heartbeat and metrics destinations are plain addresses too.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointAddress(String);

impl EndpointAddress {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for EndpointAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A message as it travels through queues.
///
/// Immutable once built: there are no setters. Audit and dead-letter copies
/// are new values derived with [`Message::with_header`], keeping the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    message_type: MessageType,
    payload: Vec<u8>,
    headers: BTreeMap<String, String>,
    enqueued_at: DateTime<Utc>,
}

impl Message {
    pub fn new(message_type: MessageType, payload: Vec<u8>, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::generate(),
            message_type,
            payload,
            headers: BTreeMap::new(),
            enqueued_at,
        }
    }

    /// Build a message around a JSON-encoded body.
    pub fn json<T: Serialize>(
        message_type: MessageType,
        body: &T,
        enqueued_at: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(message_type, serde_json::to_vec(body)?, enqueued_at))
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn message_type(&self) -> &MessageType {
        &self.message_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    /// Copy of this message with one more header; id and payload are kept.
    pub fn with_header(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.headers.insert(name.into(), value.into());
        copy
    }

    /// Builder-style variant of [`Message::with_header`] for fresh messages.
    pub fn header_set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_keep_identity_and_leave_original_untouched() {
        let original = Message::new(MessageType::new("t.v1"), b"{}".to_vec(), Utc::now());
        let copy = original.with_header(headers::FAILURE_REASON, "boom");

        assert_eq!(copy.id(), original.id());
        assert_eq!(copy.payload(), original.payload());
        assert_eq!(copy.header(headers::FAILURE_REASON), Some("boom"));
        assert!(original.headers().is_empty());
    }

    #[test]
    fn json_constructor_encodes_body() {
        let msg = Message::json(
            MessageType::new("t.v1"),
            &serde_json::json!({"id": 7}),
            Utc::now(),
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_slice(msg.payload()).unwrap();
        assert_eq!(value["id"], 7);
    }

    #[test]
    fn type_tag_serializes_transparently() {
        let s = serde_json::to_string(&MessageType::new("acme.order.v1")).unwrap();
        assert_eq!(s, "\"acme.order.v1\"");
    }
}

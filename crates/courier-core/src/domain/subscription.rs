use serde::{Deserialize, Serialize};

use super::{EndpointAddress, MessageType};

/// Durable record that `endpoint` wants to receive events of `event_type`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subscription {
    pub event_type: MessageType,
    pub endpoint: EndpointAddress,
}

impl Subscription {
    pub fn new(event_type: MessageType, endpoint: EndpointAddress) -> Self {
        Self {
            event_type,
            endpoint,
        }
    }
}

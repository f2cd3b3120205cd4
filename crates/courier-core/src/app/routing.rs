//! Static routes: message type -> destination endpoint.

use std::collections::BTreeMap;

use crate::domain::{EndpointAddress, MessageType};
use crate::error::{CourierError, Result};

#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: BTreeMap<MessageType, EndpointAddress>,
}

impl Router {
    pub fn new(routes: BTreeMap<MessageType, EndpointAddress>) -> Self {
        Self { routes }
    }

    pub fn route_for(&self, message_type: &MessageType) -> Result<&EndpointAddress> {
        self.routes
            .get(message_type)
            .ok_or_else(|| CourierError::NoRoute(message_type.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrouted_type_is_a_configuration_error() {
        let router = Router::new(BTreeMap::from([(
            MessageType::new("a.v1"),
            EndpointAddress::new("sales"),
        )]));

        assert_eq!(
            router.route_for(&MessageType::new("a.v1")).unwrap().as_str(),
            "sales"
        );
        let err = router.route_for(&MessageType::new("b.v1")).unwrap_err();
        assert!(matches!(err, CourierError::NoRoute(_)));
    }
}

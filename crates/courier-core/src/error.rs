//! Error taxonomy for the endpoint runtime.

use thiserror::Error;

use crate::domain::{EndpointAddress, MessageType};

/// Operational classification of an error.
///
/// The dispatcher and workers branch on this, never on the variant itself:
/// - `Unrecoverable`: can never succeed, dead-letter without spending retry budget.
/// - `Configuration`: operator must fix the endpoint, surfaced and never retried.
/// - `Business`: handler failure, consumes the recoverability budget.
/// - `Infrastructure`: transient store/transport outage, retried without budget.
/// - `Terminal`: the message already reached the error queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unrecoverable,
    Configuration,
    Business,
    Infrastructure,
    Terminal,
}

impl ErrorKind {
    /// Value written to the `courier.failure.kind` header.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Unrecoverable => "unrecoverable",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Business => "business",
            ErrorKind::Infrastructure => "infrastructure",
            ErrorKind::Terminal => "terminal",
        }
    }
}

#[derive(Debug, Error)]
pub enum CourierError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("no handler registered for message_type={0}")]
    NoHandlerRegistered(MessageType),

    #[error("duplicate handler for message_type={0}")]
    DuplicateHandler(MessageType),

    #[error("missing message types: {0:?}. These types were expected but not registered.")]
    MissingMessageTypes(Vec<String>),

    #[error("no route configured for message_type={0}")]
    NoRoute(MessageType),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("handler failed: {0}")]
    HandlerFailure(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("message dead-lettered to {queue}: {reason}")]
    DeadLettered {
        queue: EndpointAddress,
        reason: String,
    },

    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CourierError {
    /// Shorthand for a business failure raised from a handler body.
    pub fn handler(reason: impl Into<String>) -> Self {
        CourierError::HandlerFailure(reason.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            // an unknown transaction id is a state bug, retrying cannot fix it
            CourierError::MalformedMessage(_)
            | CourierError::Serialization(_)
            | CourierError::TransactionNotFound(_) => ErrorKind::Unrecoverable,
            CourierError::NoHandlerRegistered(_)
            | CourierError::DuplicateHandler(_)
            | CourierError::MissingMessageTypes(_)
            | CourierError::NoRoute(_)
            | CourierError::InvalidConfig(_) => ErrorKind::Configuration,
            CourierError::HandlerFailure(_) => ErrorKind::Business,
            CourierError::StoreUnavailable(_)
            | CourierError::TransportUnavailable(_) => ErrorKind::Infrastructure,
            CourierError::DeadLettered { .. } => ErrorKind::Terminal,
        }
    }

    pub fn is_infrastructure(&self) -> bool {
        self.kind() == ErrorKind::Infrastructure
    }
}

pub type Result<T, E = CourierError> = std::result::Result<T, E>;

//! Typed messages: bind a Rust type to its type tag.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Whether a message is addressed (command) or broadcast to subscribers (event).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Command,
    Event,
}

/// A message type known to the runtime.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct OrderPlaced { order_id: u64 }
///
/// impl TypedMessage for OrderPlaced {
///     const TYPE: &'static str = "acme.sales.order_placed.v1";
///     const KIND: MessageKind = MessageKind::Event;
/// }
/// ```
///
/// Naming convention: `{namespace}.{domain}.{name}.v{major}`.
pub trait TypedMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;
    const KIND: MessageKind = MessageKind::Command;
}

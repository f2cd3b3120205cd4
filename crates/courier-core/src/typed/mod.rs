//! Typed message API.
//!
//! - surface: `TypedMessage`, `Handler<M>`, checked at compile time
//! - inside: `DynHandler`, `PayloadCodec`, type-erased per type tag

pub mod codec;
pub mod handler;
pub mod message;
pub mod registry;

pub use self::codec::{JsonCodec, PayloadCodec};
pub use self::handler::{DynHandler, Handler, TypedHandler};
pub use self::message::{MessageKind, TypedMessage};
pub use self::registry::HandlerRegistry;

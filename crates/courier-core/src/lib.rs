//! courier-core
//!
//! Transactional messaging endpoint runtime.
//!
//! # Modules
//! - **domain**: messages, addresses, ids, delivery attempts, recoverability states
//! - **ports**: `DurableStore`, `Transport`, `Clock`, `MetricsSink`
//! - **impls**: in-memory store, store-backed transport, clocks, metrics sinks
//! - **recoverability**: retry policy, recovery engine, worker backoff
//! - **subscriptions**: TTL cache over the subscription table
//! - **typed**: `TypedMessage`, `Handler<M>`, `HandlerRegistry`
//! - **app**: dispatcher, workers, sessions, endpoint wiring, heartbeats, metrics
//! - **config**: validated endpoint configuration
//! - **error**: `CourierError` and its classification

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod recoverability;
pub mod subscriptions;
pub mod typed;

pub use app::{
    Endpoint, EndpointBuilder, HandlerContext, MessageSession, RunningEndpoint, TransactionScope,
};
pub use config::EndpointConfig;
pub use domain::{EndpointAddress, Message, MessageId, MessageType};
pub use error::{CourierError, ErrorKind, Result};
pub use typed::{Handler, MessageKind, TypedMessage};

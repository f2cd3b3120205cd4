//! Implementations of the ports.
//!
//! - [`InMemoryStore`]: transactional store for development, tests and
//!   single-process deployments.
//! - [`StoreTransport`]: transport riding on a `DurableStore`, giving atomic
//!   send-with-receive.
//! - [`ManualClock`]: settable clock for deterministic tests.
//! - [`QueueMetricsSink`] / [`LogMetricsSink`]: metrics destinations.
//!
//! A relational store lives in its own crate and implements `DurableStore`.

pub mod manual_clock;
pub mod memory_store;
pub mod metrics_sinks;
pub mod store_transport;

pub use self::manual_clock::ManualClock;
pub use self::memory_store::InMemoryStore;
pub use self::metrics_sinks::{LogMetricsSink, QueueMetricsSink};
pub use self::store_transport::StoreTransport;

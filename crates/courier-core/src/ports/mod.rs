//! Ports: the seams between the runtime and its collaborators.
//!
//! - [`DurableStore`]: transactional queues, subscriptions and attempt history.
//! - [`Transport`]: send/receive on top of a transaction handle.
//! - [`MetricsSink`]: destination of periodic metrics reports.
//! - [`Clock`]: time source.

pub mod clock;
pub mod metrics_sink;
pub mod store;
pub mod transport;

pub use self::clock::{Clock, SystemClock};
pub use self::metrics_sink::MetricsSink;
pub use self::store::DurableStore;
pub use self::transport::Transport;

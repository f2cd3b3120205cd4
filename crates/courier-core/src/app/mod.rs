//! Application layer: the endpoint runtime built on the ports.
//!
//! - **EndpointBuilder / Endpoint**: wiring and start-up validation
//! - **Dispatcher**: one message through its handlers in one transaction
//! - **WorkerGroup**: N workers driving the dispatcher
//! - **MessageSession**: sends and subscriptions outside of handlers
//! - **HeartbeatLoop / MetricsLoop**: periodic background tasks

pub mod builder;
pub mod context;
pub mod dispatcher;
pub mod heartbeat_loop;
pub mod metrics_loop;
pub mod outgoing;
pub mod routing;
pub mod session;
pub mod status;
pub mod transaction;
pub mod worker_loop;

pub use self::builder::{Endpoint, EndpointBuilder, RunningEndpoint};
pub use self::context::HandlerContext;
pub use self::dispatcher::Dispatcher;
pub use self::heartbeat_loop::{HEARTBEAT_MESSAGE_TYPE, Heartbeat, HeartbeatLoop};
pub use self::metrics_loop::MetricsLoop;
pub use self::session::MessageSession;
pub use self::status::{EndpointMetrics, MetricsReport, MetricsSnapshot};
pub use self::transaction::TransactionScope;
pub use self::worker_loop::WorkerGroup;

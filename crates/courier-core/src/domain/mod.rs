//! Domain model (ids, messages, delivery attempts, recoverability states).

pub mod attempt;
pub mod ids;
pub mod message;
pub mod state;
pub mod subscription;

pub use attempt::{AttemptOutcome, DeliveryAttempt};
pub use ids::{MessageId, TransactionId};
pub use message::{EndpointAddress, Message, MessageType, headers};
pub use state::{ProcessOutcome, RecoveryState};
pub use subscription::Subscription;

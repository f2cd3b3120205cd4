//! Recoverability: immediate retries, delayed retries, dead-letter.

pub mod backoff;
pub mod engine;
pub mod policy;

pub use backoff::InfrastructureBackoff;
pub use engine::RecoverabilityEngine;
pub use policy::{RecoverabilityPolicy, RecoveryAction};

//! Clock port.
//!
//! Everything time-dependent (delayed retry eligibility, subscription cache
//! expiry, audit timestamps) reads the time through this trait so tests can
//! drive it with `ManualClock`.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

//! Wall-clock source used by the tick and by one-shot scheduling.

use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Source of the current wall-clock time.
///
/// Timers sleep on the tokio clock, but decide whether they are due by
/// asking this clock. The two can disagree by a few milliseconds on real
/// hardware, which is exactly the case the scheduler has to survive.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

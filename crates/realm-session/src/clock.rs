use std::{fmt::Debug, time::Instant};

/// Source of the current time for token bookkeeping.
pub trait Clock: Debug + Send + Sync {
    /// Gets the current time according to this clock.
    fn now(&self) -> Instant;
}

/// The monotonic system clock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
pub(crate) use manual::ManualClock;

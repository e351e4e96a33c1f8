//! Monotonic time abstractions shared by firmware and host targets.
//!
//! The engine never reads a global clock. Each [`Hub`](crate::Hub) owns a
//! [`Clock`] and threads the sampled instant through its subsystems, which
//! keeps every state machine deterministic under test.

use core::{ops::Add, time::Duration};

use crate::telemetry::TelemetryInstant;

/// Bounds required of the instant type carried through the engine.
pub trait HubInstant: Copy + Ord + Add<Duration, Output = Self> + TelemetryInstant {}

impl<T> HubInstant for T where T: Copy + Ord + Add<Duration, Output = T> + TelemetryInstant {}

/// Source of monotonic timestamps.
pub trait Clock {
    /// Instant type produced by this clock.
    type Instant: HubInstant;

    /// Samples the current instant.
    fn now(&self) -> Self::Instant;
}

impl<C> Clock for &C
where
    C: Clock + ?Sized,
{
    type Instant = C::Instant;

    fn now(&self) -> Self::Instant {
        (**self).now()
    }
}

/// Returns `true` when strictly more than `limit` has passed between `since` and `now`.
pub fn exceeded<T: HubInstant>(now: T, since: T, limit: Duration) -> bool {
    now.saturating_duration_since(since) > limit
}

/// Millisecond instant used by host tooling.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Millis(u64);

impl Millis {
    /// Builds an instant from a raw millisecond count.
    #[must_use]
    pub const fn from_millis(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw millisecond count.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }
}

impl Add<Duration> for Millis {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        let delta = u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(delta))
    }
}

impl TelemetryInstant for Millis {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exceeded_is_strict() {
        let start = Millis::from_millis(1_000);
        let limit = Duration::from_millis(20);

        assert!(!exceeded(start + limit, start, limit));
        assert!(exceeded(
            start + limit + Duration::from_millis(1),
            start,
            limit
        ));
    }

    #[test]
    fn duration_since_saturates() {
        let early = Millis::from_millis(5);
        let late = Millis::from_millis(9);

        assert_eq!(late.saturating_duration_since(early).as_millis(), 4);
        assert_eq!(early.saturating_duration_since(late), Duration::ZERO);
    }
}

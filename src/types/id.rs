//! Identifier and logical-time types for runtime entities.
//!
//! `FiberId` values are allocated by a [`Runtime`](crate::runtime::Runtime)
//! from a per-runtime counter; they are never process-global, so two runtime
//! contexts may reuse the same numbers without ambiguity inside either one.

use core::fmt;
use serde::{Deserialize, Serialize};
use std::ops::Add;
use std::time::Duration;

/// A unique identifier for a fiber within one runtime context.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FiberId(u64);

impl FiberId {
    /// Creates a fiber ID from a raw counter value (internal use).
    #[inline]
    #[must_use]
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw counter value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Creates a fiber ID for testing purposes.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for FiberId {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FiberId({})", self.0)
    }
}

impl fmt::Display for FiberId {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// A logical timestamp in nanoseconds.
///
/// Under [`WallClock`](crate::time::WallClock) this tracks elapsed wall time
/// since the clock's epoch; under [`VirtualClock`](crate::time::VirtualClock)
/// it is virtual time advanced explicitly by the test driver.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Time(u64);

impl Time {
    /// The zero instant (epoch).
    pub const ZERO: Self = Self(0);

    /// The maximum representable instant.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a time from nanoseconds since epoch.
    #[inline]
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates a time from milliseconds since epoch.
    #[inline]
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Creates a time from seconds since epoch.
    #[inline]
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    /// Returns the time as nanoseconds since epoch.
    #[inline]
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Returns the time as milliseconds since epoch (truncated).
    #[inline]
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Adds a duration in nanoseconds, saturating on overflow.
    #[inline]
    #[must_use]
    pub const fn saturating_add_nanos(self, nanos: u64) -> Self {
        Self(self.0.saturating_add(nanos))
    }

    /// Returns the duration between two times, saturating at zero.
    #[inline]
    #[must_use]
    pub const fn duration_since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Time {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Duration) -> Self::Output {
        let nanos: u64 = rhs.as_nanos().min(u128::from(u64::MAX)) as u64;
        self.saturating_add_nanos(nanos)
    }
}

impl fmt::Debug for Time {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Time({}ns)", self.0)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1_000_000_000 {
            write!(
                f,
                "{}.{:03}s",
                self.0 / 1_000_000_000,
                (self.0 / 1_000_000) % 1000
            )
        } else if self.0 >= 1_000_000 {
            write!(f, "{}ms", self.0 / 1_000_000)
        } else if self.0 >= 1_000 {
            write!(f, "{}us", self.0 / 1_000)
        } else {
            write!(f, "{}ns", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fiber_id_display_format() {
        let id = FiberId::new_for_test(42);
        assert_eq!(format!("{id}"), "F42");
        assert_eq!(format!("{id:?}"), "FiberId(42)");
    }

    #[test]
    fn fiber_id_ordering_and_equality() {
        let a = FiberId::new_for_test(1);
        let b = FiberId::new_for_test(2);
        assert!(a < b);
        assert_eq!(a, FiberId::new_for_test(1));
    }

    #[test]
    fn fiber_id_serde_roundtrip() {
        let id = FiberId::new_for_test(99);
        let json = serde_json::to_string(&id).expect("serialize");
        let back: FiberId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(id, back);
    }

    #[test]
    fn time_conversions() {
        assert_eq!(Time::from_secs(1).as_nanos(), 1_000_000_000);
        assert_eq!(Time::from_millis(1).as_nanos(), 1_000_000);
        assert_eq!(Time::from_nanos(1_500_000_000).as_millis(), 1500);
    }

    #[test]
    fn time_saturates() {
        assert_eq!(Time::MAX.saturating_add_nanos(1), Time::MAX);
        assert_eq!(Time::from_millis(u64::MAX), Time::MAX);
        assert_eq!(Time::ZERO.duration_since(Time::from_secs(5)), Duration::ZERO);
    }

    #[test]
    fn time_add_duration() {
        let t = Time::from_secs(1) + Duration::from_millis(500);
        assert_eq!(t.as_millis(), 1500);
    }

    #[test]
    fn time_display_scales_units() {
        assert_eq!(format!("{}", Time::from_nanos(1_234_000_000)), "1.234s");
        assert_eq!(format!("{}", Time::from_millis(500)), "500ms");
        assert_eq!(format!("{}", Time::from_nanos(5_000)), "5us");
        assert_eq!(format!("{}", Time::from_nanos(42)), "42ns");
    }
}

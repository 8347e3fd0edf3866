use std::time::Duration;

pub(crate) const MAX_NANOS: u64 = u64::MAX - 1;

/// `Instant` represents a point in time measured by a [`Clock`][clock]. It has
/// nanosecond precision.
///
/// Instants are only comparable when they were produced by the same clock. The
/// real clock counts from its own creation, while a [`FakeClock`][fake] counts
/// from a fixed epoch.
///
/// [clock]: ./struct.Clock.html
/// [fake]: ./struct.FakeClock.html
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant {
    elapsed_ns: u64,
}

impl Instant {
    pub(crate) fn from_nanos(nanos: u64) -> Instant {
        debug_assert!(nanos <= MAX_NANOS);
        Instant { elapsed_ns: nanos }
    }

    pub(crate) fn from_duration_since_clock_start(duration: Duration) -> Instant {
        Instant::from_nanos(Self::duration_to_saturating_nanoseconds(duration))
    }

    /// Returns the number of nanoseconds since the origin of the clock that
    /// produced this instant.
    pub fn as_nanos(&self) -> u64 {
        self.elapsed_ns
    }

    /// Converts a `std::time::Duration` to nanoseconds, saturating to
    /// `MAX_NANOS` (`u64::MAX - 1`) if the duration is too large.
    /// (`Duration::as_nanos` returns `u128`)
    pub(crate) fn duration_to_saturating_nanoseconds(duration: Duration) -> u64 {
        u64::try_from(duration.as_nanos())
            .map(|n| n.min(MAX_NANOS))
            .unwrap_or(MAX_NANOS)
    }

    /// Returns the instant `duration` after this one, saturating at the largest
    /// representable instant.
    pub fn saturating_add(&self, duration: Duration) -> Instant {
        let dur_ns = Self::duration_to_saturating_nanoseconds(duration);
        Instant::from_nanos(self.elapsed_ns.saturating_add(dur_ns).min(MAX_NANOS))
    }

    /// Returns the time elapsed from `earlier` to this instant, or zero if
    /// `earlier` is later than this instant.
    pub fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.saturating_sub(earlier.elapsed_ns))
    }
}

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant as StdInstant},
};

use crossbeam_utils::atomic::AtomicCell;

use super::instant::{Instant, MAX_NANOS};

/// 1984-04-04T00:00:00Z, as a duration since the Unix epoch.
const FAKE_CLOCK_EPOCH: Duration = Duration::from_secs(449_884_800);

/// The source of time used by a cache to compute and evaluate expirations.
///
/// `Clock::default()` returns the real, monotonic clock. Use
/// [`Clock::fake`](#method.fake) to get a clock whose time only moves when you
/// call [`FakeClock::advance`](./struct.FakeClock.html#method.advance), which
/// makes expiration deterministic in tests.
///
/// Cloning a `Clock` is cheap and the clone shares the same source of time.
///
/// # Examples
///
/// ```rust
/// use memo::{sync::Cache, Clock};
/// use std::time::Duration;
///
/// let (clock, fake) = Clock::fake();
/// let cache: Cache<&str, &str> = Cache::builder()
///     .clock(clock)
///     .time_to_live(Duration::from_secs(60))
///     .build();
///
/// cache.insert("k", "v");
/// fake.advance(Duration::from_secs(59));
/// assert_eq!(cache.get(&"k").ok(), Some("v"));
///
/// fake.advance(Duration::from_secs(1));
/// assert!(cache.get(&"k").is_err());
/// ```
#[derive(Default, Clone)]
pub struct Clock {
    ty: ClockType,
}

#[derive(Clone)]
enum ClockType {
    /// A clock that uses `std::time::Instant` as the source of time.
    Standard { origin: StdInstant },
    #[cfg(feature = "quanta")]
    /// A clock that uses both `std::time::Instant` and `quanta::Instant` as the
    /// sources of time.
    Hybrid {
        std_origin: StdInstant,
        quanta_origin: quanta::Instant,
    },
    /// A clock driven by a `FakeClock`.
    Fake { fake: Arc<FakeClock> },
}

impl Default for ClockType {
    /// Create a new `ClockType` with the current time as the origin.
    ///
    /// If the `quanta` feature is enabled, `Hybrid` will be used. Otherwise,
    /// `Standard` will be used.
    fn default() -> Self {
        #[cfg(feature = "quanta")]
        {
            return ClockType::Hybrid {
                std_origin: StdInstant::now(),
                quanta_origin: quanta::Instant::now(),
            };
        }

        #[allow(unreachable_code)]
        ClockType::Standard {
            origin: StdInstant::now(),
        }
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ty {
            ClockType::Standard { .. } => f.write_str("Clock::Standard"),
            #[cfg(feature = "quanta")]
            ClockType::Hybrid { .. } => f.write_str("Clock::Hybrid"),
            ClockType::Fake { fake } => f.debug_tuple("Clock::Fake").field(fake).finish(),
        }
    }
}

impl Clock {
    /// Creates a new `Clock` driven by a fresh [`FakeClock`][fake], and returns
    /// both. Keep the `Arc<FakeClock>` to move time forward.
    ///
    /// [fake]: ./struct.FakeClock.html
    pub fn fake() -> (Clock, Arc<FakeClock>) {
        let fake = Arc::new(FakeClock::default());
        let clock = Clock::from(Arc::clone(&fake));
        (clock, fake)
    }

    /// Returns the current time using a reliable, monotonic source of time.
    ///
    /// When the type is `Standard` or `Hybrid`, the time is based on
    /// `std::time::Instant`. When the clock is fake, the time is whatever the
    /// `FakeClock` was advanced to.
    pub fn now(&self) -> Instant {
        match &self.ty {
            ClockType::Standard { origin } => {
                Instant::from_duration_since_clock_start(origin.elapsed())
            }
            #[cfg(feature = "quanta")]
            ClockType::Hybrid { std_origin, .. } => {
                Instant::from_duration_since_clock_start(std_origin.elapsed())
            }
            ClockType::Fake { fake } => fake.now(),
        }
    }

    /// Returns the current time _maybe_ using a fast but less reliable source of
    /// time. The time may drift from the time returned by `now`, or not be
    /// monotonically increasing.
    ///
    /// This is only used to measure elapsed time for statistics, never to
    /// compute expirations.
    ///
    /// When the type is `Hybrid`, the time is based on `quanta::Instant`, which can
    /// be faster than `std::time::Instant`, depending on the CPU architecture.
    pub fn fast_now(&self) -> Instant {
        match &self.ty {
            #[cfg(feature = "quanta")]
            ClockType::Hybrid { quanta_origin, .. } => {
                Instant::from_duration_since_clock_start(quanta_origin.elapsed())
            }
            ClockType::Standard { .. } | ClockType::Fake { .. } => self.now(),
        }
    }
}

impl From<Arc<FakeClock>> for Clock {
    fn from(fake: Arc<FakeClock>) -> Self {
        Clock {
            ty: ClockType::Fake { fake },
        }
    }
}

/// A manually driven source of time.
///
/// A `FakeClock` starts at a fixed epoch and only moves forward when
/// [`advance`](#method.advance) is called. Reading it is a single atomic load.
pub struct FakeClock {
    now_ns: AtomicCell<u64>,
}

impl Default for FakeClock {
    fn default() -> Self {
        let epoch = Instant::duration_to_saturating_nanoseconds(FAKE_CLOCK_EPOCH);
        Self {
            now_ns: AtomicCell::new(epoch),
        }
    }
}

impl fmt::Debug for FakeClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeClock")
            .field("elapsed", &self.elapsed())
            .finish()
    }
}

impl FakeClock {
    /// Creates a new `FakeClock` set to its epoch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward by `amount`, saturating at the largest
    /// representable instant.
    pub fn advance(&self, amount: Duration) {
        let amount = Instant::duration_to_saturating_nanoseconds(amount);
        let mut current = self.now_ns.load();
        loop {
            let new = current.saturating_add(amount).min(MAX_NANOS);
            match self.now_ns.compare_exchange(current, new) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns the current fake time.
    pub fn now(&self) -> Instant {
        Instant::from_nanos(self.now_ns.load())
    }

    /// Returns how far this clock has been advanced since its epoch.
    pub fn elapsed(&self) -> Duration {
        let epoch = Instant::duration_to_saturating_nanoseconds(FAKE_CLOCK_EPOCH);
        Duration::from_nanos(self.now_ns.load().saturating_sub(epoch))
    }
}

#[cfg(test)]
mod tests {
    use super::{Clock, FakeClock, FAKE_CLOCK_EPOCH};

    use std::time::Duration;

    #[test]
    fn real_clock_is_monotonic() {
        let clock = Clock::default();
        let u = clock.now();
        let v = clock.now();
        assert!(v >= u);

        let u = clock.fast_now();
        std::thread::sleep(Duration::from_millis(1));
        let v = clock.fast_now();
        assert!(v > u);
    }

    #[test]
    fn fake_clock_starts_at_its_epoch() {
        let fake = FakeClock::new();
        assert_eq!(fake.now().as_nanos() as u128, FAKE_CLOCK_EPOCH.as_nanos());
        assert_eq!(fake.elapsed(), Duration::ZERO);
    }

    #[test]
    fn fake_clock_advances_to_the_future() {
        let (clock, fake) = Clock::fake();
        let u = clock.now();

        fake.advance(Duration::from_secs(7 * 60));
        let v = clock.now();
        assert_eq!(v.saturating_duration_since(u), Duration::from_secs(7 * 60));
        assert_eq!(clock.fast_now(), v);

        // Clones share the same source of time.
        let cloned = clock.clone();
        fake.advance(Duration::from_nanos(1));
        assert_eq!(cloned.now(), clock.now());
        assert_eq!(fake.elapsed(), Duration::from_secs(7 * 60) + Duration::from_nanos(1));
    }

    #[test]
    fn fake_clock_saturates() {
        let (clock, fake) = Clock::fake();
        fake.advance(Duration::MAX);
        fake.advance(Duration::from_secs(1));
        assert_eq!(clock.now().as_nanos(), u64::MAX - 1);
    }
}

use std::time::Duration;

use crate::{common::time::Instant, InvalidExpiration};

#[derive(Clone, Debug)]
/// The policy of a cache.
pub struct Policy {
    name: Option<String>,
    time_to_live: Expiration,
    has_default_loader: bool,
}

impl Policy {
    pub(crate) fn new(
        name: Option<String>,
        time_to_live: Expiration,
        has_default_loader: bool,
    ) -> Self {
        Self {
            name,
            time_to_live,
            has_default_loader,
        }
    }

    /// Returns the name of the cache, if one was given to the builder.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the default expiration applied by `insert` and by `get` family
    /// methods that do not override it.
    pub fn time_to_live(&self) -> Expiration {
        self.time_to_live
    }

    /// Returns `true` if the cache was built with a default loader.
    pub fn has_default_loader(&self) -> bool {
        self.has_default_loader
    }
}

/// How long a cached result stays valid after it was stored.
///
/// An entry stored with `Expiration::After(d)` at time `t` expires at `t + d`;
/// expiry is inclusive, so a lookup at exactly `t + d` no longer sees it.
/// `Expiration::Never` entries stay until they are replaced or invalidated.
///
/// A zero duration means "never expires", so `Expiration::from(Duration::ZERO)`
/// and `Expiration::After(Duration::ZERO)` both behave like `Expiration::Never`.
///
/// # Examples
///
/// ```rust
/// use memo::Expiration;
/// use std::time::Duration;
///
/// assert_eq!(Expiration::from(Duration::ZERO), Expiration::Never);
/// assert_eq!(Expiration::from(None), Expiration::Never);
/// assert_eq!(
///     Expiration::from(Duration::from_secs(60)),
///     Expiration::After(Duration::from_secs(60))
/// );
///
/// // Signed inputs (e.g. from a configuration file) are checked.
/// assert!(Expiration::from_nanos(-1).is_err());
/// assert_eq!(Expiration::from_nanos(0), Ok(Expiration::Never));
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Expiration {
    /// The entry never expires.
    #[default]
    Never,
    /// The entry expires once the duration has elapsed after it was stored.
    After(Duration),
}

impl Expiration {
    /// Converts a signed number of nanoseconds to an `Expiration`.
    ///
    /// Zero means [`Expiration::Never`]. Negative values are rejected with
    /// [`InvalidExpiration::Negative`].
    pub fn from_nanos(nanos: i64) -> Result<Self, InvalidExpiration> {
        match u64::try_from(nanos) {
            Ok(nanos) => Ok(Self::from(Duration::from_nanos(nanos))),
            Err(_) => Err(InvalidExpiration::Negative { nanos }),
        }
    }

    /// Returns the duration, or `None` if the entry never expires.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::After(d) if !d.is_zero() => Some(*d),
            _ => None,
        }
    }

    /// Returns `true` if this expiration never fires.
    pub fn is_never(&self) -> bool {
        self.duration().is_none()
    }

    pub(crate) fn expire_at(&self, now: Instant) -> Option<Instant> {
        self.duration().map(|d| now.saturating_add(d))
    }
}

impl From<Duration> for Expiration {
    fn from(duration: Duration) -> Self {
        if duration.is_zero() {
            Self::Never
        } else {
            Self::After(duration)
        }
    }
}

impl From<Option<Duration>> for Expiration {
    fn from(duration: Option<Duration>) -> Self {
        duration.map(Self::from).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::Expiration;
    use crate::{Clock, InvalidExpiration};

    use std::time::Duration;

    #[test]
    fn zero_means_never() {
        assert!(Expiration::from(Duration::ZERO).is_never());
        assert!(Expiration::After(Duration::ZERO).is_never());
        assert_eq!(Expiration::After(Duration::ZERO).duration(), None);
        assert!(!Expiration::from(Duration::from_secs(1)).is_never());
    }

    #[test]
    fn from_nanos() {
        assert_eq!(
            Expiration::from_nanos(1_500),
            Ok(Expiration::After(Duration::from_nanos(1_500)))
        );
        assert_eq!(
            Expiration::from_nanos(i64::MIN),
            Err(InvalidExpiration::Negative { nanos: i64::MIN })
        );
    }

    #[test]
    fn expire_at() {
        let (clock, _fake) = Clock::fake();
        let now = clock.now();

        assert_eq!(Expiration::Never.expire_at(now), None);
        assert_eq!(
            Expiration::from(Duration::from_secs(60)).expire_at(now),
            Some(now.saturating_add(Duration::from_secs(60)))
        );
    }
}

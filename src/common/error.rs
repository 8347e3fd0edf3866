use std::{fmt, sync::Arc, time::Duration};

/// The error type of the `get` family methods of
/// [`sync::Cache`](./sync/struct.Cache.html).
///
/// A loader error is cached exactly like a value: every reader gets the same
/// `Arc<E>` until the entry expires, is overwritten by `insert`, or is
/// invalidated.
pub enum Error<E> {
    /// The key is not cached (or has expired) and no loader was available.
    NotFound,

    /// The requested expiration was rejected. Nothing in the cache was touched.
    InvalidExpiration(InvalidExpiration),

    /// The loader returned an error, either in this call or in an earlier call
    /// whose result is still cached.
    Loader(Arc<E>),
}

impl<E> Error<E> {
    /// Returns `true` if this is [`Error::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Returns the loader error, if this is [`Error::Loader`].
    pub fn loader_error(&self) -> Option<&Arc<E>> {
        match self {
            Self::Loader(e) => Some(e),
            _ => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("the key is not cached and no loader was supplied"),
            Self::InvalidExpiration(e) => fmt::Display::fmt(e, f),
            Self::Loader(e) => write!(f, "the loader failed: {e}"),
        }
    }
}

impl<E> std::error::Error for Error<E>
where
    E: fmt::Debug + fmt::Display,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidExpiration(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<InvalidExpiration> for Error<E> {
    fn from(e: InvalidExpiration) -> Self {
        Self::InvalidExpiration(e)
    }
}

impl<E> Clone for Error<E> {
    fn clone(&self) -> Self {
        match self {
            Self::NotFound => Self::NotFound,
            Self::InvalidExpiration(e) => Self::InvalidExpiration(e.clone()),
            Self::Loader(e) => Self::Loader(Arc::clone(e)),
        }
    }
}

impl<E: PartialEq> PartialEq for Error<E> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::NotFound, Self::NotFound) => true,
            (Self::InvalidExpiration(a), Self::InvalidExpiration(b)) => a == b,
            (Self::Loader(a), Self::Loader(b)) => a == b,
            _ => false,
        }
    }
}

impl<E: Eq> Eq for Error<E> {}

impl<E: fmt::Debug> fmt::Debug for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("NotFound"),
            Self::InvalidExpiration(e) => f.debug_tuple("InvalidExpiration").field(e).finish(),
            Self::Loader(e) => f.debug_tuple("Loader").field(e).finish(),
        }
    }
}

/// An expiration that a cache cannot honor.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidExpiration {
    /// A signed expiration was below zero.
    #[error("expiration must not be negative, but got {nanos}ns")]
    Negative {
        /// The rejected value in nanoseconds.
        nanos: i64,
    },

    /// The expiration was longer than 1000 years.
    #[error("expiration {0:?} is longer than 1000 years")]
    TooLong(Duration),
}

use super::{cache::Loader, Cache};
use crate::{
    common::builder_utils::{ensure_expiration, ensure_expiration_or_panic},
    Clock, Expiration, InvalidExpiration,
};

use std::{
    collections::hash_map::RandomState,
    fmt,
    hash::{BuildHasher, Hash},
    sync::Arc,
};

/// Builds a [`Cache`][cache-struct] with various configuration knobs.
///
/// [cache-struct]: ./struct.Cache.html
///
/// # Examples
///
/// ```rust
/// use memo::sync::Cache;
///
/// use std::time::Duration;
///
/// let cache = Cache::<u64, String>::builder()
///     .name("squares")
///     // Results are cached for 30 minutes.
///     .time_to_live(Duration::from_secs(30 * 60))
///     // Called on a miss by `get`.
///     .loader(|n| Ok((n * n).to_string()))
///     .build();
///
/// assert_eq!(cache.get(&12), Ok("144".to_string()));
/// ```
///
pub struct CacheBuilder<K, V, E> {
    name: Option<String>,
    initial_capacity: Option<usize>,
    time_to_live: Expiration,
    loader: Option<Loader<K, V, E>>,
    clock: Clock,
}

impl<K, V, E> Default for CacheBuilder<K, V, E> {
    fn default() -> Self {
        Self {
            name: None,
            initial_capacity: None,
            time_to_live: Expiration::Never,
            loader: None,
            clock: Clock::default(),
        }
    }
}

impl<K, V, E> fmt::Debug for CacheBuilder<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("name", &self.name)
            .field("initial_capacity", &self.initial_capacity)
            .field("time_to_live", &self.time_to_live)
            .field("loader", &self.loader.as_ref().map(|_| "Fn(&K) -> Result<V, E>"))
            .field("clock", &self.clock)
            .finish()
    }
}

impl<K, V, E> CacheBuilder<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Construct a new `CacheBuilder` with no default loader, no expiration and
    /// the real clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name of the cache. The name is reported by
    /// [`Cache::name`](./struct.Cache.html#method.name) and prefixes log
    /// messages.
    pub fn name(self, name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..self
        }
    }

    /// Sets the initial capacity (number of entries) of the cache.
    pub fn initial_capacity(self, capacity: usize) -> Self {
        Self {
            initial_capacity: Some(capacity),
            ..self
        }
    }

    /// Sets the default expiration of the cache.
    ///
    /// It applies to `insert` and to every `get` family call that does not
    /// override it. A zero duration means the entries never expire.
    pub fn time_to_live(self, expiration: impl Into<Expiration>) -> Self {
        Self {
            time_to_live: expiration.into(),
            ..self
        }
    }

    /// Sets the default loader, which `get` calls on a miss. Per-call loaders
    /// given to `get_with` and `get_with_options` take precedence over it.
    pub fn loader<F>(self, loader: F) -> Self
    where
        F: Fn(&K) -> Result<V, E> + Send + Sync + 'static,
    {
        Self {
            loader: Some(Arc::new(loader)),
            ..self
        }
    }

    /// Sets the clock used to compute and evaluate expirations. Pass a clock
    /// from [`Clock::fake`] to control time in tests.
    pub fn clock(self, clock: Clock) -> Self {
        Self { clock, ..self }
    }

    /// Builds a `Cache<K, V, E>`.
    ///
    /// # Panics
    ///
    /// Panics if the configured `time_to_live` is longer than 1000 years.
    pub fn build(self) -> Cache<K, V, E, RandomState> {
        ensure_expiration_or_panic(self.time_to_live);
        self.finish(RandomState::default())
    }

    /// Builds a `Cache<K, V, E>`, or returns an error if the configured
    /// `time_to_live` is longer than 1000 years.
    pub fn try_build(self) -> Result<Cache<K, V, E, RandomState>, InvalidExpiration> {
        ensure_expiration(self.time_to_live)?;
        Ok(self.finish(RandomState::default()))
    }

    /// Builds a `Cache<K, V, E, S>` with the given `hasher`.
    ///
    /// # Panics
    ///
    /// Panics if the configured `time_to_live` is longer than 1000 years.
    pub fn build_with_hasher<S>(self, hasher: S) -> Cache<K, V, E, S>
    where
        S: BuildHasher,
    {
        ensure_expiration_or_panic(self.time_to_live);
        self.finish(hasher)
    }

    /// Builds a `Cache<K, V, E, S>` with the given `hasher`, or returns an error
    /// if the configured `time_to_live` is longer than 1000 years.
    pub fn try_build_with_hasher<S>(self, hasher: S) -> Result<Cache<K, V, E, S>, InvalidExpiration>
    where
        S: BuildHasher,
    {
        ensure_expiration(self.time_to_live)?;
        Ok(self.finish(hasher))
    }

    fn finish<S>(self, hasher: S) -> Cache<K, V, E, S>
    where
        S: BuildHasher,
    {
        Cache::with_everything(
            self.name,
            self.initial_capacity,
            hasher,
            self.time_to_live,
            self.loader,
            self.clock,
        )
    }
}

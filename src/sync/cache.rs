use super::{
    base_cache::{BaseCache, Lookup},
    value_initializer::{self, InitResult},
    CacheBuilder, GetOptions,
};
use crate::{
    common::{
        builder_utils::ensure_expiration,
        entry::{SharedSlot, SlotGuard},
    },
    CacheStats, Clock, Error, Expiration, InvalidExpiration, Policy,
};

use std::{
    collections::hash_map::RandomState,
    convert::Infallible,
    fmt,
    hash::{BuildHasher, Hash},
    sync::Arc,
};

pub(crate) type Loader<K, V, E> = Arc<dyn Fn(&K) -> Result<V, E> + Send + Sync>;

/// A thread-safe memoizing cache.
///
/// `Cache` maps keys to the result of a loader. The first `get` of an absent key
/// calls the loader and caches what it returns, a value or an error, and every
/// later `get` replays that result until the entry expires, is replaced by
/// `insert`, or is invalidated.
///
/// # Single-flight loading
///
/// However many threads call `get` on the same absent key at the same time, the
/// loader runs once. The caller that runs it holds the entry's lock, and the
/// others block on that lock and then read the loaded result. A slow loader only
/// blocks callers of its own key; other keys are served concurrently.
///
/// ```rust
/// use memo::sync::Cache;
///
/// use std::{
///     sync::{
///         atomic::{AtomicUsize, Ordering},
///         Arc,
///     },
///     thread,
///     time::Duration,
/// };
///
/// const NUM_THREADS: usize = 16;
///
/// let calls = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&calls);
///
/// let cache = Cache::<u32, String>::builder()
///     .loader(move |key| {
///         counter.fetch_add(1, Ordering::AcqRel);
///         thread::sleep(Duration::from_millis(100));
///         Ok(format!("value of {key}"))
///     })
///     .build();
///
/// let threads: Vec<_> = (0..NUM_THREADS)
///     .map(|_| {
///         // To share the same cache across the threads, clone it.
///         // This is a cheap operation.
///         let my_cache = cache.clone();
///         thread::spawn(move || my_cache.get(&42))
///     })
///     .collect();
///
/// for t in threads {
///     assert_eq!(t.join().expect("Failed"), Ok("value of 42".to_string()));
/// }
/// assert_eq!(calls.load(Ordering::Acquire), 1);
/// ```
///
/// # Loaders
///
/// A loader is a closure taking `&K` and returning `Result<V, E>`. It can be set
/// as the default of the cache with the builder's `loader` method, or given per
/// call with [`get_with`](#method.get_with) or
/// [`get_with_options`](#method.get_with_options). A per-call loader takes
/// precedence over the default one. Without any loader, `get` on an absent key
/// returns [`Error::NotFound`].
///
/// Loader errors are cached like values and shared through an `Arc<E>`, so a
/// failing key is not retried until its entry expires, is replaced by `insert`
/// or is invalidated.
///
/// ```rust
/// use memo::{sync::Cache, Error};
///
/// let cache: Cache<u32, u32, String> = Cache::builder()
///     .loader(|key| Err(format!("no value for {key}")))
///     .build();
///
/// let err = cache.get(&1).unwrap_err();
/// assert_eq!(err.to_string(), "the loader failed: no value for 1");
///
/// // Replace the cached error.
/// cache.insert(1, 100);
/// assert_eq!(cache.get(&1), Ok(100));
/// ```
///
/// If a loader panics, nothing is cached for the key and the panic propagates to
/// the caller that ran it. The callers that were waiting on it try again.
///
/// # Time-based expirations
///
/// Every entry may carry an expiration. The cache-wide default is set by the
/// builder's `time_to_live`; `insert_with_expiration` and `get_with_options`
/// override it per call. An entry stored at time `t` with an expiration of `d`
/// is no longer visible at `t + d`.
///
/// Expired entries are removed lazily: every call first removes all entries
/// that have expired by then. There is no background thread.
///
/// ```rust
/// use memo::{sync::Cache, Clock, Error};
/// use std::time::Duration;
///
/// let (clock, fake) = Clock::fake();
/// let cache = Cache::<&str, &str>::builder()
///     .clock(clock)
///     .time_to_live(Duration::from_secs(60))
///     .build();
///
/// cache.insert("k", "v");
/// fake.advance(Duration::from_secs(59));
/// assert_eq!(cache.get(&"k"), Ok("v"));
///
/// fake.advance(Duration::from_secs(1));
/// assert_eq!(cache.get(&"k"), Err(Error::NotFound));
/// ```
///
/// # Avoiding to clone the value at `get`
///
/// `get` returns a clone of the stored value, as another thread may replace or
/// drop the stored value at any time. If your values are expensive to clone,
/// wrap them in `std::sync::Arc` before storing them in the cache.
///
/// # Hashing algorithm
///
/// By default, `Cache` uses the same hashing algorithm as
/// `std::collections::HashMap`. Use the builder's `build_with_hasher` to supply
/// another [`BuildHasher`].
pub struct Cache<K, V, E = Infallible, S = RandomState> {
    base: Arc<BaseCache<K, V, E, S>>,
    time_to_live: Expiration,
    loader: Option<Loader<K, V, E>>,
}

// The derived `Clone` would require `K`, `V`, `E` and `S` to be `Clone`.
impl<K, V, E, S> Clone for Cache<K, V, E, S> {
    /// Makes a clone of this shared cache.
    ///
    /// This operation is cheap as it only creates thread-safe reference counted
    /// pointers to the shared internal data structures.
    fn clone(&self) -> Self {
        Self {
            base: Arc::clone(&self.base),
            time_to_live: self.time_to_live,
            loader: self.loader.clone(),
        }
    }
}

impl<K, V, E, S> fmt::Debug for Cache<K, V, E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.base.name())
            .field("time_to_live", &self.time_to_live)
            .field("has_default_loader", &self.loader.is_some())
            .finish_non_exhaustive()
    }
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Constructs a new `Cache<K, V>` with no default loader, no expiration and
    /// the real clock.
    ///
    /// To adjust various configuration knobs such as `time_to_live` or a
    /// default `loader`, use the [`CacheBuilder`][builder-struct].
    ///
    /// [builder-struct]: ./struct.CacheBuilder.html
    pub fn new() -> Self {
        Self::builder().build()
    }
}

impl<K, V> Default for Cache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> Cache<K, V, E, RandomState>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Returns a [`CacheBuilder`][builder-struct], which can build a `Cache`
    /// with various configuration knobs.
    ///
    /// [builder-struct]: ./struct.CacheBuilder.html
    pub fn builder() -> CacheBuilder<K, V, E> {
        CacheBuilder::default()
    }
}

impl<K, V, E, S> Cache<K, V, E, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher,
{
    pub(crate) fn with_everything(
        name: Option<String>,
        initial_capacity: Option<usize>,
        build_hasher: S,
        time_to_live: Expiration,
        loader: Option<Loader<K, V, E>>,
        clock: Clock,
    ) -> Self {
        Self {
            base: Arc::new(BaseCache::new(
                name,
                initial_capacity,
                build_hasher,
                clock,
            )),
            time_to_live,
            loader,
        }
    }

    /// Returns the name of this cache.
    pub fn name(&self) -> Option<&str> {
        self.base.name()
    }

    /// Returns a read-only cache policy of this cache.
    pub fn policy(&self) -> Policy {
        Policy::new(
            self.base.name().map(ToString::to_string),
            self.time_to_live,
            self.loader.is_some(),
        )
    }

    /// Returns a snapshot of the statistics of this cache.
    pub fn stats(&self) -> CacheStats {
        self.base.stats().snapshot()
    }

    /// Returns the cached result for the key, calling the default loader on a
    /// miss.
    ///
    /// A result loaded by this call expires after the cache's `time_to_live`.
    /// Returns `Err(Error::NotFound)` on a miss if the cache has no default
    /// loader.
    ///
    /// If another thread is loading the key, this call blocks until that load
    /// completes and returns its result.
    pub fn get(&self, key: &K) -> Result<V, Error<E>> {
        self.get_or_load(key, self.loader.as_deref(), self.time_to_live)
    }

    /// Returns the cached result for the key, calling `loader` on a miss.
    ///
    /// `loader` is called at most once, and only if no other caller is already
    /// loading the key. A result loaded by this call expires after the cache's
    /// `time_to_live`.
    ///
    /// # Panics
    ///
    /// Resumes the panic if `loader` panics. Nothing is cached for the key in
    /// that case.
    pub fn get_with(
        &self,
        key: &K,
        loader: impl FnOnce(&K) -> Result<V, E>,
    ) -> Result<V, Error<E>> {
        self.get_or_load(key, Some(loader), self.time_to_live)
    }

    /// Returns the cached result for the key, using the loader and the
    /// expiration in `options` in place of the cache's defaults.
    ///
    /// An invalid expiration is reported as `Err(Error::InvalidExpiration(..))`
    /// before the cache is touched or any loader is called.
    pub fn get_with_options(
        &self,
        key: &K,
        options: GetOptions<'_, K, V, E>,
    ) -> Result<V, Error<E>> {
        let expiration = options.expiration.unwrap_or(self.time_to_live);
        match options.loader {
            Some(loader) => self.get_or_load(key, Some(loader), expiration),
            None => self.get_or_load(key, self.loader.as_deref(), expiration),
        }
    }

    /// Inserts a value for the key, replacing any cached value or error. The
    /// entry expires after the cache's `time_to_live`.
    ///
    /// If a loader is running for the key, this call waits for it to complete
    /// and then overwrites its result.
    pub fn insert(&self, key: K, value: V) {
        self.insert_with(key, value, self.time_to_live);
    }

    /// Inserts a value for the key with its own expiration, replacing any
    /// cached value, error and expiration.
    ///
    /// Returns an error, without touching the cache, if `expiration` is longer
    /// than 1000 years.
    pub fn insert_with_expiration(
        &self,
        key: K,
        value: V,
        expiration: impl Into<Expiration>,
    ) -> Result<(), InvalidExpiration> {
        let expiration = expiration.into();
        ensure_expiration(expiration)?;
        self.insert_with(key, value, expiration);
        Ok(())
    }

    /// Discards any cached entry for the key.
    ///
    /// A loader that is running for the key is not interrupted. Its result is
    /// returned to the callers that were waiting for it, but not cached.
    pub fn invalidate(&self, key: &K) {
        self.base
            .section(self.base.clock().now(), |s| s.invalidate(key));
    }

    /// Discards all cached entries.
    pub fn invalidate_all(&self) {
        self.base
            .section(self.base.clock().now(), |s| s.invalidate_all());
    }

    /// Returns `true` if the cache has an unexpired entry for the key. An entry
    /// whose loader is still running counts.
    ///
    /// Unlike `get`, this never blocks on a running loader.
    pub fn contains_key(&self, key: &K) -> bool {
        self.base
            .section(self.base.clock().now(), |s| s.contains_key(key))
    }

    /// Returns the number of unexpired entries in the cache.
    pub fn entry_count(&self) -> u64 {
        self.base.entry_count()
    }

    /// Removes the expired entries now rather than at the next call, and
    /// returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.base.purge_expired()
    }

    fn get_or_load<L>(
        &self,
        key: &K,
        mut loader: Option<L>,
        expiration: Expiration,
    ) -> Result<V, Error<E>>
    where
        L: FnOnce(&K) -> Result<V, E>,
    {
        ensure_expiration(expiration)?;

        let mut retries = 0;
        loop {
            let now = self.base.clock().now();
            let expire_at = expiration.expire_at(now);
            let reserve = loader.is_some();

            match self
                .base
                .section(now, |s| s.lookup_or_reserve(key, expire_at, reserve))
            {
                Lookup::Found(slot) => {
                    // Blocks while the entry is being loaded.
                    let result = (*slot.lock()).clone();
                    if let Some(result) = result {
                        self.base.stats().record_hit();
                        return result.map_err(Error::Loader);
                    }

                    // The loader of this entry panicked. Drop the entry and
                    // start over.
                    self.base
                        .section(self.base.clock().now(), |s| s.invalidate_slot(key, &slot));
                    value_initializer::ensure_retries(retries);
                    retries += 1;
                }
                Lookup::Absent => {
                    self.base.stats().record_miss();
                    return Err(Error::NotFound);
                }
                Lookup::Reserved(slot, guard) => {
                    self.base.stats().record_miss();
                    return match loader.take() {
                        Some(loader) => self.load(key, &slot, guard, loader),
                        None => unreachable!("reserved an entry without a loader"),
                    };
                }
            }
        }
    }

    fn load(
        &self,
        key: &K,
        slot: &SharedSlot<V, E>,
        guard: SlotGuard<V, E>,
        loader: impl FnOnce(&K) -> Result<V, E>,
    ) -> Result<V, Error<E>> {
        let clock = self.base.clock();
        let start = clock.fast_now();
        let elapsed_nanos = || {
            let elapsed = clock.fast_now().saturating_duration_since(start);
            u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
        };

        let res = value_initializer::init_slot(
            guard,
            || loader(key),
            |_payload| {
                self.base.stats().record_load_failure(elapsed_nanos());
                self.base
                    .section(clock.now(), |s| s.invalidate_slot(key, slot));
                #[cfg(feature = "logging")]
                value_initializer::log_panic(_payload, self.base.name());
            },
        );

        // The entry lock is released. Index the loaded entry now.
        let now = clock.now();
        if self
            .base
            .section(now, |s| s.finish_load(key, slot, now))
            .is_some()
        {
            self.base.stats().record_expirations(1);
        }

        match res {
            InitResult::Initialized(value) => {
                self.base.stats().record_load_success(elapsed_nanos());
                Ok(value)
            }
            InitResult::InitErr(e) => {
                self.base.stats().record_load_failure(elapsed_nanos());
                Err(Error::Loader(e))
            }
        }
    }

    fn insert_with(&self, mut key: K, mut value: V, expiration: Expiration) {
        loop {
            let now = self.base.clock().now();
            let expire_at = expiration.expire_at(now);

            let Some((slot, k, v)) = self.base.section(now, |s| s.insert(key, value, expire_at))
            else {
                return;
            };

            // Blocks while the entry is being loaded.
            let mut guard = slot.lock();
            if guard.is_some() {
                *guard = Some(Ok(v));
                return;
            }
            std::mem::drop(guard);

            // The loader of this entry panicked. Replace the entry rather than
            // filling one that is about to be removed.
            self.base
                .section(self.base.clock().now(), |s| s.invalidate_slot(&k, &slot));
            key = k;
            value = v;
        }
    }
}

#[cfg(test)]
impl<K, V, E, S> Cache<K, V, E, S>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: Clone,
    S: BuildHasher,
{
    fn check_invariants(&self) {
        self.base.check_invariants(self.base.clock().now());
    }
}

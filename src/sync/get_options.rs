use crate::Expiration;

use std::fmt;

/// Per-call overrides for [`Cache::get_with_options`][get-with-options].
///
/// Anything left unset falls back to the cache's defaults: the loader and the
/// `time_to_live` given to the builder.
///
/// [get-with-options]: ./struct.Cache.html#method.get_with_options
///
/// # Examples
///
/// ```rust
/// use memo::sync::{Cache, GetOptions};
///
/// use std::time::Duration;
///
/// let cache: Cache<u32, String> = Cache::new();
///
/// let options = GetOptions::new()
///     .loader(|key: &u32| Ok(format!("value of {key}")))
///     .expiration(Duration::from_secs(10));
///
/// assert_eq!(cache.get_with_options(&1, options), Ok("value of 1".to_string()));
/// ```
pub struct GetOptions<'a, K, V, E> {
    pub(crate) loader: Option<Box<dyn FnOnce(&K) -> Result<V, E> + 'a>>,
    pub(crate) expiration: Option<Expiration>,
}

impl<'a, K, V, E> GetOptions<'a, K, V, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the loader to call if the key is not cached. It is called at most
    /// once, and only if no other caller is already loading the key.
    pub fn loader(self, loader: impl FnOnce(&K) -> Result<V, E> + 'a) -> Self {
        Self {
            loader: Some(Box::new(loader)),
            ..self
        }
    }

    /// Sets the expiration of a result loaded by this call. A cache hit keeps
    /// the expiration of the existing entry.
    pub fn expiration(self, expiration: impl Into<Expiration>) -> Self {
        Self {
            expiration: Some(expiration.into()),
            ..self
        }
    }
}

impl<'a, K, V, E> Default for GetOptions<'a, K, V, E> {
    fn default() -> Self {
        Self {
            loader: None,
            expiration: None,
        }
    }
}

impl<'a, K, V, E> fmt::Debug for GetOptions<'a, K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetOptions")
            .field("loader", &self.loader.as_ref().map(|_| "FnOnce(&K) -> Result<V, E>"))
            .field("expiration", &self.expiration)
            .finish()
    }
}

pub(crate) mod avl;
pub(crate) mod builder_utils;
pub(crate) mod entry;
pub(crate) mod error;
pub(crate) mod time;

/// The `[name] ` prefix of log messages of a named cache.
#[cfg(feature = "logging")]
pub(crate) fn log_prefix(cache_name: Option<&str>) -> String {
    cache_name
        .map(|name| format!("[{name}] "))
        .unwrap_or_default()
}

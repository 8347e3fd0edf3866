//! Provides a thread-safe memoizing cache.

mod base_cache;
mod builder;
mod cache;
mod get_options;
mod stats_counter;
mod value_initializer;

pub use {builder::CacheBuilder, cache::Cache, get_options::GetOptions};

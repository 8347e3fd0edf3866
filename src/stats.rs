//! Provides statistics about the performance of a cache.

mod cache_stats;

pub use cache_stats::CacheStats;

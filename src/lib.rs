#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Memo is a concurrent memoizing cache for Rust.
//!
//! A [`sync::Cache`] maps keys to the results of a loader closure. Concurrent
//! callers of the same absent key share a single loader call, loaders of
//! different keys run in parallel, and every cached result, value or error, may
//! carry its own time to live.
//!
//! # Features
//!
//! - Thread-safe, single-flight loading: a loader is called at most once per
//!   missing key, however many threads ask for it at the same time.
//! - Loader errors are cached exactly like values, and replayed until the entry
//!   expires, is replaced or is invalidated.
//! - Per-entry expiration with lazy removal: expired entries are removed in
//!   expiry order by the next call that sees them, in `O(log n)` each. There is
//!   no background thread.
//! - An injectable [`Clock`], including a [`FakeClock`] for deterministic tests.
//! - Cache statistics.
//!
//! # Examples
//!
//! ```rust
//! use memo::{sync::Cache, Clock, Error};
//! use std::time::Duration;
//!
//! let (clock, fake) = Clock::fake();
//! let cache = Cache::<u32, String>::builder()
//!     .clock(clock)
//!     .time_to_live(Duration::from_secs(60))
//!     .build();
//!
//! // Nothing cached, and no loader to call.
//! assert_eq!(cache.get(&1), Err(Error::NotFound));
//!
//! // Load and cache.
//! let value = cache.get_with(&1, |key| Ok(format!("value {key}")));
//! assert_eq!(value, Ok("value 1".to_string()));
//!
//! // Served from the cache until it expires.
//! fake.advance(Duration::from_secs(30));
//! assert_eq!(cache.get(&1), Ok("value 1".to_string()));
//! fake.advance(Duration::from_secs(30));
//! assert_eq!(cache.get(&1), Err(Error::NotFound));
//! ```
//!
//! # Minimum Supported Rust Versions
//!
//! This crate's minimum supported Rust version (MSRV) is 1.70.
//!
//! # Crate Features
//!
//! - `quanta` (enabled by default): uses the `quanta` crate as a fast time source
//!   for measuring loader run times.
//! - `logging`: logs through the `log` crate when a loader panics and when
//!   expired entries are removed.

pub mod stats;
pub mod sync;

pub(crate) mod common;
pub(crate) mod policy;

pub use common::{
    error::{Error, InvalidExpiration},
    time::{Clock, FakeClock, Instant},
};
pub use policy::{Expiration, Policy};
pub use stats::CacheStats;

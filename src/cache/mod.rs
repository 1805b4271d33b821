//! Response caching.
//!
//! This module provides:
//! - [`CacheKey`], derived from a request's path and normalized parameters
//! - the [`CacheStore`] contract, with an in-memory and a session-scoped SQLite store
//! - the single-flight registry that lets concurrent identical requests share one fetch

mod flight;
mod key;
mod memory;
mod sqlite;
mod store;

pub(crate) use flight::FlightRegistry;
pub use key::CacheKey;
pub use memory::MemoryCache;
pub use sqlite::SqliteCache;
pub use store::{CacheEntry, CacheStore, SharedFetch};

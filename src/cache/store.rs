use async_trait::async_trait;
use futures::future::{BoxFuture, Shared};
use serde_json::Value;

use super::CacheKey;
use crate::error::ApiError;

/// An in-flight fetch that any number of waiters can clone and await.
pub type SharedFetch = Shared<BoxFuture<'static, Result<Value, ApiError>>>;

/// What a store holds for one key.
#[derive(Clone)]
pub enum CacheEntry {
  Ready(Value),
  /// A fetch that has been started but not yet settled
  Pending(SharedFetch),
}

impl CacheEntry {
  /// Wait for the value, sharing the outcome of a pending fetch.
  pub async fn resolve(self) -> Result<Value, ApiError> {
    match self {
      CacheEntry::Ready(value) => Ok(value),
      CacheEntry::Pending(fetch) => fetch.await,
    }
  }

  pub fn is_pending(&self) -> bool {
    matches!(self, CacheEntry::Pending(_))
  }
}

impl std::fmt::Debug for CacheEntry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CacheEntry::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
      CacheEntry::Pending(_) => f.write_str("Pending"),
    }
  }
}

/// Key/value storage for responses, keyed by (path, params hash).
///
/// Each operation is atomic on its own; the coordinator never relies on two calls
/// happening together.
#[async_trait]
pub trait CacheStore: Send + Sync {
  async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, ApiError>;

  /// Store an entry, replacing whatever was there.
  ///
  /// Stores that do not hold futures reject [`CacheEntry::Pending`].
  async fn set(&self, key: &CacheKey, entry: CacheEntry) -> Result<(), ApiError>;

  /// Drop one (path, params) entry.
  async fn remove(&self, key: &CacheKey) -> Result<(), ApiError>;

  /// Drop every entry under each exact path.
  async fn delete_paths(&self, paths: &[String]) -> Result<(), ApiError>;

  async fn get_all_paths(&self) -> Result<Vec<String>, ApiError>;

  async fn delete_all_paths(&self) -> Result<(), ApiError>;

  /// Whether [`CacheEntry::Pending`] values can be stored.
  fn stores_futures(&self) -> bool;
}

pub(crate) fn pending_rejected() -> ApiError {
  ApiError::cache("this store cannot hold in-flight requests")
}

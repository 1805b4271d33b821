use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::store::{CacheEntry, CacheStore};
use super::CacheKey;
use crate::error::ApiError;

type PathEntries = HashMap<String, CacheEntry>;

/// Process-lifetime store. Holds pending fetches, so late callers join them.
#[derive(Debug, Default)]
pub struct MemoryCache {
  paths: RwLock<HashMap<String, PathEntries>>,
}

impl MemoryCache {
  pub fn new() -> Self {
    Self::default()
  }

  fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, PathEntries>>, ApiError> {
    self
      .paths
      .read()
      .map_err(|e| ApiError::cache(format!("lock poisoned: {}", e)))
  }

  fn write(
    &self,
  ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, PathEntries>>, ApiError> {
    self
      .paths
      .write()
      .map_err(|e| ApiError::cache(format!("lock poisoned: {}", e)))
  }
}

#[async_trait]
impl CacheStore for MemoryCache {
  async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, ApiError> {
    Ok(
      self
        .read()?
        .get(key.path())
        .and_then(|entries| entries.get(key.params_hash()))
        .cloned(),
    )
  }

  async fn set(&self, key: &CacheKey, entry: CacheEntry) -> Result<(), ApiError> {
    self
      .write()?
      .entry(key.path().to_string())
      .or_default()
      .insert(key.params_hash().to_string(), entry);
    Ok(())
  }

  async fn remove(&self, key: &CacheKey) -> Result<(), ApiError> {
    let mut paths = self.write()?;
    if let Some(entries) = paths.get_mut(key.path()) {
      entries.remove(key.params_hash());
      if entries.is_empty() {
        paths.remove(key.path());
      }
    }
    Ok(())
  }

  async fn delete_paths(&self, paths: &[String]) -> Result<(), ApiError> {
    let mut cached = self.write()?;
    for path in paths {
      cached.remove(path);
    }
    Ok(())
  }

  async fn get_all_paths(&self) -> Result<Vec<String>, ApiError> {
    let mut paths: Vec<String> = self.read()?.keys().cloned().collect();
    paths.sort();
    Ok(paths)
  }

  async fn delete_all_paths(&self) -> Result<(), ApiError> {
    self.write()?.clear();
    Ok(())
  }

  fn stores_futures(&self) -> bool {
    true
  }
}

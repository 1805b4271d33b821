//! Session-scoped SQLite store.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::debug;

use super::store::{pending_rejected, CacheEntry, CacheStore};
use super::CacheKey;
use crate::error::ApiError;

/// Schema for the response cache.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS request_cache (
    session_id TEXT NOT NULL,
    path TEXT NOT NULL,
    params_hash TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (session_id, path, params_hash)
);

CREATE INDEX IF NOT EXISTS idx_request_cache_path
    ON request_cache(session_id, path);
"#;

/// Persisted store; rows are scoped to one session id so several users can share a file.
///
/// Only settled values are stored. Entries older than `max_age`, when set, read as misses.
pub struct SqliteCache {
  conn: Mutex<Connection>,
  session_id: String,
  max_age: Option<Duration>,
}

impl SqliteCache {
  /// Open the store at the default location.
  pub fn open(session_id: impl Into<String>) -> Result<Self, ApiError> {
    let path = Self::default_path()?;
    Self::open_at(&path, session_id)
  }

  pub fn open_at(path: &Path, session_id: impl Into<String>) -> Result<Self, ApiError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| ApiError::cache(format!("failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      ApiError::cache(format!(
        "failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;
    Self::with_connection(conn, session_id)
  }

  pub fn open_in_memory(session_id: impl Into<String>) -> Result<Self, ApiError> {
    let conn = Connection::open_in_memory()
      .map_err(|e| ApiError::cache(format!("failed to open in-memory database: {}", e)))?;
    Self::with_connection(conn, session_id)
  }

  fn with_connection(conn: Connection, session_id: impl Into<String>) -> Result<Self, ApiError> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| ApiError::cache(format!("failed to run cache migrations: {}", e)))?;
    Ok(Self {
      conn: Mutex::new(conn),
      session_id: session_id.into(),
      max_age: None,
    })
  }

  /// Treat entries older than `max_age` as absent.
  pub fn with_max_age(mut self, max_age: Duration) -> Self {
    self.max_age = Some(max_age);
    self
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf, ApiError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| ApiError::cache("could not determine data directory"))?;

    Ok(data_dir.join("canvas-engine").join("cache.db"))
  }

  pub fn session_id(&self) -> &str {
    &self.session_id
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
    self
      .conn
      .lock()
      .map_err(|e| ApiError::cache(format!("lock poisoned: {}", e)))
  }

  fn is_expired(&self, cached_at: DateTime<Utc>) -> bool {
    self
      .max_age
      .is_some_and(|max_age| Utc::now() - cached_at > max_age)
  }
}

#[async_trait]
impl CacheStore for SqliteCache {
  async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, ApiError> {
    let row: Option<(Vec<u8>, String)> = self
      .conn()?
      .query_row(
        "SELECT data, cached_at FROM request_cache
         WHERE session_id = ? AND path = ? AND params_hash = ?",
        params![self.session_id, key.path(), key.params_hash()],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| ApiError::cache(format!("failed to read cache entry: {}", e)))?;

    let Some((data, cached_at)) = row else {
      return Ok(None);
    };
    if self.is_expired(parse_datetime(&cached_at)?) {
      debug!(key = %key, "cache entry expired");
      return Ok(None);
    }

    let value: Value = serde_json::from_slice(&data)
      .map_err(|e| ApiError::cache(format!("failed to deserialize cache entry: {}", e)))?;
    Ok(Some(CacheEntry::Ready(value)))
  }

  async fn set(&self, key: &CacheKey, entry: CacheEntry) -> Result<(), ApiError> {
    let value = match entry {
      CacheEntry::Ready(value) => value,
      CacheEntry::Pending(_) => return Err(pending_rejected()),
    };
    let data = serde_json::to_vec(&value)
      .map_err(|e| ApiError::cache(format!("failed to serialize cache entry: {}", e)))?;

    self
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO request_cache (session_id, path, params_hash, data, cached_at)
         VALUES (?, ?, ?, ?, datetime('now'))",
        params![self.session_id, key.path(), key.params_hash(), data],
      )
      .map_err(|e| ApiError::cache(format!("failed to store cache entry: {}", e)))?;
    Ok(())
  }

  async fn remove(&self, key: &CacheKey) -> Result<(), ApiError> {
    self
      .conn()?
      .execute(
        "DELETE FROM request_cache WHERE session_id = ? AND path = ? AND params_hash = ?",
        params![self.session_id, key.path(), key.params_hash()],
      )
      .map_err(|e| ApiError::cache(format!("failed to remove cache entry: {}", e)))?;
    Ok(())
  }

  async fn delete_paths(&self, paths: &[String]) -> Result<(), ApiError> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| ApiError::cache(format!("failed to begin transaction: {}", e)))?;
    for path in paths {
      tx.execute(
        "DELETE FROM request_cache WHERE session_id = ? AND path = ?",
        params![self.session_id, path],
      )
      .map_err(|e| ApiError::cache(format!("failed to delete cached path {}: {}", path, e)))?;
    }
    tx.commit()
      .map_err(|e| ApiError::cache(format!("failed to commit transaction: {}", e)))?;
    Ok(())
  }

  async fn get_all_paths(&self) -> Result<Vec<String>, ApiError> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT DISTINCT path FROM request_cache WHERE session_id = ? ORDER BY path")
      .map_err(|e| ApiError::cache(format!("failed to prepare query: {}", e)))?;
    let paths = stmt
      .query_map(params![self.session_id], |row| row.get(0))
      .map_err(|e| ApiError::cache(format!("failed to list cached paths: {}", e)))?
      .collect::<Result<Vec<String>, _>>()
      .map_err(|e| ApiError::cache(format!("failed to list cached paths: {}", e)))?;
    Ok(paths)
  }

  async fn delete_all_paths(&self) -> Result<(), ApiError> {
    self
      .conn()?
      .execute(
        "DELETE FROM request_cache WHERE session_id = ?",
        params![self.session_id],
      )
      .map_err(|e| ApiError::cache(format!("failed to clear cache: {}", e)))?;
    Ok(())
  }

  fn stores_futures(&self) -> bool {
    false
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, ApiError> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| ApiError::cache(format!("failed to parse datetime '{}': {}", s, e)))
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, MutexGuard};

use super::store::SharedFetch;
use super::CacheKey;

struct Flight {
  id: u64,
  fetch: SharedFetch,
}

/// Registry of fetches that are currently running, at most one per key.
///
/// Every check-then-register, settle and invalidation happens while holding the registry
/// lock, so two callers can never both decide to start the same fetch.
#[derive(Default)]
pub struct FlightRegistry {
  flights: Mutex<HashMap<CacheKey, Flight>>,
  next_id: AtomicU64,
}

impl FlightRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// A fresh id for a fetch about to be registered.
  pub fn next_id(&self) -> u64 {
    self.next_id.fetch_add(1, Ordering::Relaxed)
  }

  pub async fn lock(&self) -> Flights<'_> {
    Flights {
      guard: self.flights.lock().await,
    }
  }
}

/// Locked view of a [`FlightRegistry`].
pub struct Flights<'a> {
  guard: MutexGuard<'a, HashMap<CacheKey, Flight>>,
}

impl Flights<'_> {
  /// The running fetch for `key`, for a caller that wants to wait on it.
  pub fn joinable(&self, key: &CacheKey) -> Option<SharedFetch> {
    self.guard.get(key).map(|flight| flight.fetch.clone())
  }

  /// Record `fetch` as the one fetch for `key`, superseding any older one.
  pub fn register(&mut self, key: CacheKey, id: u64, fetch: SharedFetch) {
    self.guard.insert(key, Flight { id, fetch });
  }

  /// Retire fetch `id` for `key`. Returns false when it was invalidated or superseded in the
  /// meantime, in which case its result must not be stored.
  pub fn finish(&mut self, key: &CacheKey, id: u64) -> bool {
    match self.guard.get(key) {
      Some(flight) if flight.id == id => {
        self.guard.remove(key);
        true
      }
      _ => false,
    }
  }

  /// Forget every fetch whose path matches; returns how many were dropped.
  pub fn forget_where(&mut self, mut matches: impl FnMut(&str) -> bool) -> usize {
    let before = self.guard.len();
    self.guard.retain(|key, _| !matches(key.path()));
    before - self.guard.len()
  }

  pub fn clear(&mut self) {
    self.guard.clear();
  }
}

//! Turns one logical request into cache lookups, HTTP calls and invalidations.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheKey, CacheStore, FlightRegistry, SharedFetch};
use crate::error::{ApiError, ErrorKind};
use crate::pager::{fetch_pages, PagePlan, PageRequest};
use crate::params::encode;
use crate::request::{join_path, Method, RequestDescriptor};
use crate::transport::{HttpRequest, Transport, TransportError};

/// Shared handle to the engine. Cloning is cheap; clones share cache and in-flight fetches.
#[derive(Clone)]
pub struct RequestCoordinator {
  inner: Arc<Inner>,
}

struct Inner {
  base_url: Url,
  transport: Arc<dyn Transport>,
  cache: Option<Arc<dyn CacheStore>>,
  flights: FlightRegistry,
}

impl RequestCoordinator {
  pub fn new(
    base_url: Url,
    transport: Arc<dyn Transport>,
    cache: Option<Arc<dyn CacheStore>>,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        base_url,
        transport,
        cache,
        flights: FlightRegistry::new(),
      }),
    }
  }

  pub fn base_url(&self) -> &Url {
    &self.inner.base_url
  }

  pub fn cache(&self) -> Option<&Arc<dyn CacheStore>> {
    self.inner.cache.as_ref()
  }

  /// Perform a logical request.
  ///
  /// GETs are served from the cache when possible and concurrent identical GETs share one
  /// fetch. Successful mutations invalidate the cached paths they affect.
  pub async fn visit(&self, descriptor: RequestDescriptor) -> Result<Value, ApiError> {
    let is_get = descriptor.method.is_get();
    let control = descriptor.cache_control;
    let read = is_get && !control.ignore_cache;
    let write = is_get && !control.dont_cache;

    let value = match &self.inner.cache {
      Some(store) if read || write => {
        self
          .cached_fetch(Arc::clone(store), descriptor.clone(), read, write)
          .await?
      }
      _ => self.inner.fetch(&descriptor).await?,
    };

    if !is_get {
      if let Some(store) = &self.inner.cache {
        self
          .invalidate(store.as_ref(), &mutation_targets(&descriptor, &value))
          .await?;
      }
    }
    Ok(value)
  }

  async fn cached_fetch(
    &self,
    store: Arc<dyn CacheStore>,
    descriptor: RequestDescriptor,
    read: bool,
    write: bool,
  ) -> Result<Value, ApiError> {
    let key = CacheKey::for_request(&descriptor);
    let mut flights = self.inner.flights.lock().await;

    if read {
      if let Some(fetch) = flights.joinable(&key) {
        drop(flights);
        debug!(key = %key, "joining in-flight request");
        return fetch.await;
      }
      if let Some(entry) = store.get(&key).await? {
        drop(flights);
        debug!(key = %key, pending = entry.is_pending(), "cache hit");
        return entry.resolve().await;
      }
      debug!(key = %key, "cache miss");
    }

    if !write {
      drop(flights);
      return self.inner.fetch(&descriptor).await;
    }

    // Registered before any network I/O so that callers arriving later join this fetch.
    let id = self.inner.flights.next_id();
    let fetch: SharedFetch = {
      let inner = Arc::clone(&self.inner);
      let store = Arc::clone(&store);
      let key = key.clone();
      async move {
        let result = inner.fetch(&descriptor).await;
        inner.settle(store.as_ref(), &key, id, result).await
      }
      .boxed()
      .shared()
    };
    flights.register(key.clone(), id, fetch.clone());
    if store.stores_futures() {
      if let Err(err) = store.set(&key, CacheEntry::Pending(fetch.clone())).await {
        flights.finish(&key, id);
        return Err(err);
      }
    }
    drop(flights);

    fetch.await
  }

  /// Remove cached responses for `paths` (a trailing `*` matches by prefix) and hand back
  /// `passthrough`, so mutations can chain it onto their result.
  ///
  /// Paths are used as given; callers apply any path prefix themselves.
  pub async fn uncache<T>(&self, paths: &[String], passthrough: T) -> Result<T, ApiError> {
    if let Some(store) = &self.inner.cache {
      self.invalidate(store.as_ref(), paths).await?;
    }
    Ok(passthrough)
  }

  /// Drop the whole cache, including fetches still running.
  pub async fn flush(&self) -> Result<(), ApiError> {
    let Some(store) = &self.inner.cache else {
      return Ok(());
    };
    let mut flights = self.inner.flights.lock().await;
    flights.clear();
    store.delete_all_paths().await?;
    info!("flushed request cache");
    Ok(())
  }

  /// Every path that currently has at least one cached response.
  pub async fn cached_paths(&self) -> Result<Vec<String>, ApiError> {
    match &self.inner.cache {
      Some(store) => store.get_all_paths().await,
      None => Ok(Vec::new()),
    }
  }

  async fn invalidate(&self, store: &dyn CacheStore, targets: &[String]) -> Result<(), ApiError> {
    if targets.is_empty() {
      return Ok(());
    }

    let mut exact = BTreeSet::new();
    let mut prefixes = Vec::new();
    for target in targets {
      match target.strip_suffix('*') {
        Some(prefix) => prefixes.push(prefix),
        None => {
          exact.insert(target.clone());
        }
      }
    }

    let mut flights = self.inner.flights.lock().await;
    let mut doomed = exact.clone();
    if !prefixes.is_empty() {
      for path in store.get_all_paths().await? {
        if prefixes.iter().any(|prefix| path.starts_with(prefix)) {
          doomed.insert(path);
        }
      }
    }
    let in_flight = flights.forget_where(|path| {
      exact.contains(path) || prefixes.iter().any(|prefix| path.starts_with(prefix))
    });

    let doomed: Vec<String> = doomed.into_iter().collect();
    store.delete_paths(&doomed).await?;
    info!(targets = ?targets, removed = doomed.len(), in_flight, "invalidated cached paths");
    Ok(())
  }
}

impl Inner {
  async fn fetch(&self, descriptor: &RequestDescriptor) -> Result<Value, ApiError> {
    let path = descriptor.full_path();
    let mut url = self.base_url.join(&path).map_err(|e| {
      ApiError::new(
        ErrorKind::InvalidSyntax,
        format!("Could not build a request URL for {}: {}", path, e),
      )
    })?;

    let wire = encode(descriptor);
    let body = if descriptor.method.is_get() {
      if !wire.is_empty() {
        url.set_query(Some(&wire.to_query_string()));
      }
      None
    } else {
      Some(wire.to_query_string())
    };
    let first = HttpRequest {
      method: descriptor.method,
      url,
      body,
    };

    debug!(method = %descriptor.method, path = %path, "sending request");
    let plan = PagePlan::for_request(descriptor);
    let transport = &self.transport;
    let token = descriptor.access_token.as_deref();
    fetch_pages(&plan, |page: PageRequest| {
      let request = match page.cursor {
        None => Ok(first.clone()),
        Some(cursor) => self.cursor_request(&cursor, token),
      };
      async move { transport.send(request?).await }
    })
    .await
  }

  /// Next-page cursors are followed with GET; the token is re-attached when the server left
  /// it out of the link.
  fn cursor_request(&self, cursor: &str, token: Option<&str>) -> Result<HttpRequest, TransportError> {
    let mut url = self.base_url.join(cursor)?;
    if let Some(token) = token {
      if !url.query_pairs().any(|(k, _)| k == "access_token") {
        url.query_pairs_mut().append_pair("access_token", token);
      }
    }
    Ok(HttpRequest {
      method: Method::Get,
      url,
      body: None,
    })
  }

  /// Retire fetch `id` and store its outcome, unless it was invalidated or superseded while
  /// running.
  async fn settle(
    &self,
    store: &dyn CacheStore,
    key: &CacheKey,
    id: u64,
    result: Result<Value, ApiError>,
  ) -> Result<Value, ApiError> {
    let mut flights = self.flights.lock().await;
    if !flights.finish(key, id) {
      debug!(key = %key, "request was invalidated while in flight; not caching");
      return result;
    }

    match result {
      Ok(value) => {
        store.set(key, CacheEntry::Ready(value.clone())).await?;
        Ok(value)
      }
      Err(err) => {
        if store.stores_futures() {
          if let Err(remove_err) = store.remove(key).await {
            warn!(key = %key, error = %remove_err, "could not drop failed request from cache");
          }
        }
        Err(err)
      }
    }
  }
}

/// Paths a successful mutation makes stale.
fn mutation_targets(descriptor: &RequestDescriptor, value: &Value) -> Vec<String> {
  let path = descriptor.full_path();
  let mut targets = Vec::new();

  match descriptor.method {
    Method::Get => {}
    Method::Post => {
      for field in ["id", "url"] {
        if let Some(segment) = value.get(field).and_then(path_segment) {
          targets.push(format!("{}/{}", path, segment));
        }
      }
      targets.push(path);
    }
    Method::Put | Method::Delete => {
      let trimmed = path.trim_end_matches('/');
      if let Some((parent, _)) = trimmed.rsplit_once('/') {
        if !parent.is_empty() {
          targets.push(parent.to_string());
        }
      }
      targets.push(format!("{}*", trimmed));
    }
  }

  targets.extend(
    descriptor
      .also_invalidate
      .iter()
      .map(|extra| join_path(&descriptor.path_prefix, extra)),
  );
  targets
}

fn path_segment(value: &Value) -> Option<String> {
  match value {
    Value::String(s) if !s.is_empty() => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use tracing::info;

use crate::cache::{CacheStore, MemoryCache, SqliteCache};
use crate::config::{CacheKind, Config};
use crate::coordinator::RequestCoordinator;
use crate::endpoint::{Api, CallOptions, EndpointRegistry};
use crate::error::{ApiError, ErrorKind};
use crate::progress::{wait_for_completion, WaitOptions};
use crate::request::{Method, RequestDefaults, RequestDescriptor, RequestOverrides};
use crate::transport::{base_url, ReqwestTransport, Transport};

/// Entry point for library users: one engine, its cache and its endpoints.
#[derive(Clone)]
pub struct CanvasClient {
  api: Api,
  wait: WaitOptions,
}

impl CanvasClient {
  pub fn builder(host: impl Into<String>) -> CanvasClientBuilder {
    CanvasClientBuilder::new(host)
  }

  /// Build a client with the cache variant and request defaults named in `config`.
  pub fn from_config(config: &Config) -> Result<Self> {
    let cache: Option<Arc<dyn CacheStore>> = match config.cache.kind {
      CacheKind::None => None,
      CacheKind::Memory => Some(Arc::new(MemoryCache::new())),
      CacheKind::Sqlite => {
        let session = config.cache.session.clone();
        let store = match &config.cache.path {
          Some(path) => SqliteCache::open_at(path, session)?,
          None => SqliteCache::open(session)?,
        };
        let store = match config.cache.max_age_minutes {
          Some(minutes) => store.with_max_age(chrono::Duration::minutes(i64::from(minutes))),
          None => store,
        };
        Some(Arc::new(store))
      }
    };

    let defaults = config.request_defaults();
    if defaults.access_token.is_none() {
      info!("no access token configured; requests will be unauthenticated");
    }

    let client = CanvasClientBuilder::new(config.canvas.host.clone())
      .cache(cache)
      .defaults(defaults)
      .wait_options(config.wait.options())
      .build()
      .map_err(|e| eyre!("Failed to set up Canvas client: {}", e))?;
    Ok(client)
  }

  pub fn api(&self) -> &Api {
    &self.api
  }

  pub fn coordinator(&self) -> &RequestCoordinator {
    self.api.coordinator()
  }

  /// A descriptor with this client's defaults applied.
  pub fn request(&self, method: Method, path: impl Into<String>) -> RequestDescriptor {
    self
      .api
      .defaults()
      .descriptor(method, path, &RequestOverrides::default())
  }

  pub async fn visit(&self, descriptor: RequestDescriptor) -> Result<Value, ApiError> {
    self.api.visit(descriptor).await
  }

  pub async fn call(&self, endpoint: &str, options: CallOptions) -> Result<Value, ApiError> {
    self.api.call(endpoint, options).await
  }

  pub async fn uncache(&self, paths: &[String]) -> Result<(), ApiError> {
    self.coordinator().uncache(paths, ()).await
  }

  pub async fn flush_cache(&self) -> Result<(), ApiError> {
    self.coordinator().flush().await
  }

  pub async fn cached_paths(&self) -> Result<Vec<String>, ApiError> {
    self.coordinator().cached_paths().await
  }

  pub async fn wait_for_completion(&self, progress_url: &str) -> Result<Value, ApiError> {
    wait_for_completion(&self.api, progress_url, &self.wait).await
  }
}

pub struct CanvasClientBuilder {
  host: String,
  transport: Option<Arc<dyn Transport>>,
  cache: Option<Arc<dyn CacheStore>>,
  defaults: RequestDefaults,
  endpoints: EndpointRegistry,
  wait: WaitOptions,
}

impl CanvasClientBuilder {
  pub fn new(host: impl Into<String>) -> Self {
    Self {
      host: host.into(),
      transport: None,
      cache: Some(Arc::new(MemoryCache::new())),
      defaults: RequestDefaults::default(),
      endpoints: EndpointRegistry::new(),
      wait: WaitOptions::default(),
    }
  }

  /// Replace the HTTP layer (defaults to [`ReqwestTransport`]).
  pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
    self.transport = Some(transport);
    self
  }

  /// `None` disables caching.
  pub fn cache(mut self, cache: Option<Arc<dyn CacheStore>>) -> Self {
    self.cache = cache;
    self
  }

  pub fn defaults(mut self, defaults: RequestDefaults) -> Self {
    self.defaults = defaults;
    self
  }

  pub fn access_token(mut self, token: impl Into<String>) -> Self {
    self.defaults.access_token = Some(token.into());
    self
  }

  pub fn endpoints(mut self, endpoints: EndpointRegistry) -> Self {
    self.endpoints = endpoints;
    self
  }

  pub fn wait_options(mut self, wait: WaitOptions) -> Self {
    self.wait = wait;
    self
  }

  pub fn build(self) -> Result<CanvasClient, ApiError> {
    let base = base_url(&self.host).map_err(|e| {
      ApiError::new(
        ErrorKind::InvalidSyntax,
        format!("\"{}\" is not a usable Canvas host: {}", self.host, e),
      )
    })?;
    let transport = match self.transport {
      Some(transport) => transport,
      None => Arc::new(ReqwestTransport::new().map_err(|e| {
        ApiError::new(
          ErrorKind::TransportFailure,
          format!("Could not set up the HTTP client: {}", e),
        )
      })?),
    };

    let coordinator = RequestCoordinator::new(base, transport, self.cache);
    Ok(CanvasClient {
      api: Api::new(coordinator, self.endpoints, self.defaults),
      wait: self.wait,
    })
  }
}

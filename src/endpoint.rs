//! Binding business-logic functions to the engine.
//!
//! An endpoint is a plain function that receives an [`EndpointContext`] and the caller's
//! [`CallOptions`] and returns a boxed future. [`Api::call`] looks the endpoint up by name,
//! checks its required arguments, runs it, and annotates any failure with what the endpoint
//! was trying to do. Endpoints call each other through [`EndpointContext::api`], so a failure
//! deep in a chain still renders as one sentence.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::debug;

use crate::coordinator::RequestCoordinator;
use crate::error::{ApiError, BoxError, ErrorKind};
use crate::request::{join_path, Method, RequestDefaults, RequestDescriptor, RequestOverrides};

pub type CoreFuture<'a> = BoxFuture<'a, Result<Value, BoxError>>;

/// The business logic of one endpoint.
pub type CoreFn = for<'a> fn(&'a EndpointContext, &'a CallOptions) -> CoreFuture<'a>;

#[derive(Clone, Copy)]
pub struct EndpointDef {
  pub name: &'static str,
  /// Phrase completing "While attempting to ...", e.g. "get the list of courses"
  pub action: &'static str,
  pub required_params: &'static [&'static str],
  /// `None` for endpoints that are declared but have no implementation bound
  pub core: Option<CoreFn>,
}

impl EndpointDef {
  pub const fn new(name: &'static str, action: &'static str, core: CoreFn) -> Self {
    Self {
      name,
      action,
      required_params: &[],
      core: Some(core),
    }
  }

  /// An endpoint that is known by name but cannot be called.
  pub const fn declared(name: &'static str, action: &'static str) -> Self {
    Self {
      name,
      action,
      required_params: &[],
      core: None,
    }
  }

  pub const fn requires(mut self, params: &'static [&'static str]) -> Self {
    self.required_params = params;
    self
  }
}

impl std::fmt::Debug for EndpointDef {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EndpointDef")
      .field("name", &self.name)
      .field("action", &self.action)
      .field("required_params", &self.required_params)
      .field("bound", &self.core.is_some())
      .finish()
  }
}

#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
  endpoints: HashMap<&'static str, EndpointDef>,
}

impl EndpointRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, def: EndpointDef) -> Self {
    self.insert(def);
    self
  }

  pub fn insert(&mut self, def: EndpointDef) {
    self.endpoints.insert(def.name, def);
  }

  pub fn get(&self, name: &str) -> Option<&EndpointDef> {
    self.endpoints.get(name)
  }

  pub fn names(&self) -> Vec<&'static str> {
    let mut names: Vec<_> = self.endpoints.keys().copied().collect();
    names.sort_unstable();
    names
  }

  pub fn len(&self) -> usize {
    self.endpoints.len()
  }

  pub fn is_empty(&self) -> bool {
    self.endpoints.is_empty()
  }
}

/// Arguments for one endpoint call.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
  pub args: Map<String, Value>,
  pub overrides: RequestOverrides,
}

impl CallOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.args.insert(key.into(), value.into());
    self
  }

  pub fn overrides(mut self, overrides: RequestOverrides) -> Self {
    self.overrides = overrides;
    self
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.args.get(key).filter(|v| !v.is_null())
  }

  pub fn has(&self, key: &str) -> bool {
    self.get(key).is_some()
  }

  /// An argument used as a path segment: a string, or a number rendered without quotes.
  pub fn segment(&self, key: &str) -> Result<String, ApiError> {
    match self.get(key) {
      Some(Value::String(s)) => Ok(s.clone()),
      Some(Value::Number(n)) => Ok(n.to_string()),
      Some(other) => Err(ApiError::new(
        ErrorKind::InvalidSyntax,
        format!("\"{}\" must be an id or a string, not {}", key, other),
      )),
      None => Err(missing_param(key)),
    }
  }
}

fn missing_param(key: &str) -> ApiError {
  ApiError::new(
    ErrorKind::MissingRequiredParam,
    format!("The required parameter \"{}\" was not included.", key),
  )
}

/// What a running endpoint can reach.
pub struct EndpointContext {
  api: Api,
  overrides: RequestOverrides,
}

impl EndpointContext {
  pub fn api(&self) -> &Api {
    &self.api
  }

  pub fn overrides(&self) -> &RequestOverrides {
    &self.overrides
  }

  /// A descriptor for `method path` carrying the client defaults and this call's overrides.
  pub fn request(&self, method: Method, path: impl Into<String>) -> RequestDescriptor {
    self.api.defaults().descriptor(method, path, &self.overrides)
  }

  pub async fn visit_endpoint(&self, descriptor: RequestDescriptor) -> Result<Value, ApiError> {
    self.api.visit(descriptor).await
  }

  /// Invalidate `paths` (with the active path prefix applied) and return `passthrough`.
  pub async fn uncache<T>(&self, paths: &[&str], passthrough: T) -> Result<T, ApiError> {
    let prefix = self
      .overrides
      .path_prefix
      .as_deref()
      .unwrap_or(&self.api.defaults().path_prefix);
    let paths: Vec<String> = paths.iter().map(|p| join_path(prefix, p)).collect();
    self.api.coordinator().uncache(&paths, passthrough).await
  }
}

struct ApiInner {
  coordinator: RequestCoordinator,
  registry: EndpointRegistry,
  defaults: RequestDefaults,
}

/// The engine plus the endpoints bound to it.
#[derive(Clone)]
pub struct Api {
  inner: Arc<ApiInner>,
}

impl Api {
  pub fn new(
    coordinator: RequestCoordinator,
    registry: EndpointRegistry,
    defaults: RequestDefaults,
  ) -> Self {
    Self {
      inner: Arc::new(ApiInner {
        coordinator,
        registry,
        defaults,
      }),
    }
  }

  pub fn coordinator(&self) -> &RequestCoordinator {
    &self.inner.coordinator
  }

  pub fn registry(&self) -> &EndpointRegistry {
    &self.inner.registry
  }

  pub fn defaults(&self) -> &RequestDefaults {
    &self.inner.defaults
  }

  pub async fn visit(&self, descriptor: RequestDescriptor) -> Result<Value, ApiError> {
    self.inner.coordinator.visit(descriptor).await
  }

  /// Run the endpoint registered as `name`.
  pub async fn call(&self, name: &str, options: CallOptions) -> Result<Value, ApiError> {
    let def = self.inner.registry.get(name).copied().ok_or_else(|| {
      ApiError::new(
        ErrorKind::UnresolvableBinding,
        format!("There is no endpoint called \"{}\".", name),
      )
    })?;
    let core = def.core.ok_or_else(|| {
      ApiError::new(
        ErrorKind::UnresolvableBinding,
        format!("The \"{}\" endpoint could not be bound to this client.", name),
      )
      .with_frame(def.action)
    })?;

    if let Some(missing) = def
      .required_params
      .iter()
      .copied()
      .find(|p| !options.has(p))
    {
      return Err(missing_param(missing).with_frame(def.action));
    }

    debug!(endpoint = name, "calling endpoint");
    let ctx = EndpointContext {
      api: self.clone(),
      overrides: options.overrides.clone(),
    };
    let outcome = AssertUnwindSafe(async { core(&ctx, &options).await })
      .catch_unwind()
      .await;

    match outcome {
      Ok(Ok(value)) => Ok(value),
      Ok(Err(err)) => Err(ApiError::from_boxed(err).with_frame(def.action)),
      Err(panic) => Err(
        ApiError::new(
          ErrorKind::EndpointMalfunction,
          format!(
            "The \"{}\" endpoint did not produce a result ({}).",
            name,
            panic_message(panic.as_ref())
          ),
        )
        .with_frame(def.action),
      ),
    }
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
  payload
    .downcast_ref::<&str>()
    .copied()
    .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
    .unwrap_or("panicked")
}

#[cfg(test)]
pub(crate) fn test_api(
  fake: &Arc<crate::transport::fake::FakeCanvas>,
  registry: EndpointRegistry,
) -> Api {
  use crate::cache::{CacheStore, MemoryCache};
  use crate::transport::Transport;

  let coordinator = RequestCoordinator::new(
    url::Url::parse("https://canvas.test").unwrap(),
    Arc::clone(fake) as Arc<dyn Transport>,
    Some(Arc::new(MemoryCache::new()) as Arc<dyn CacheStore>),
  );
  let defaults = RequestDefaults {
    access_token: Some("test-token".into()),
    ..RequestDefaults::default()
  };
  Api::new(coordinator, registry, defaults)
}

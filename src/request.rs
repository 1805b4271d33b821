//! Request descriptors: everything the coordinator needs to run one logical request.

use std::num::NonZeroU32;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{ApiError, ErrorKind};
use crate::params::{ParamValue, Params};

/// Items requested per page when nothing else is configured.
pub const DEFAULT_ITEMS_PER_PAGE: NonZeroU32 = match NonZeroU32::new(100) {
  Some(n) => n,
  None => unreachable!(),
};

/// Transport retries per page when nothing else is configured.
pub const DEFAULT_NUM_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl Method {
  pub fn as_str(self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    }
  }

  pub fn is_get(self) -> bool {
    self == Method::Get
  }
}

impl std::fmt::Display for Method {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Method {
  type Err = ApiError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "DELETE" => Ok(Method::Delete),
      other => Err(ApiError::new(
        ErrorKind::InvalidSyntax,
        format!("Unsupported HTTP method: {}", other),
      )),
    }
  }
}

impl From<Method> for reqwest::Method {
  fn from(method: Method) -> Self {
    match method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

/// Per-request cache switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheControl {
  /// Skip the cache lookup (the fresh result may still be stored)
  pub ignore_cache: bool,
  /// Do not store the result
  pub dont_cache: bool,
}

/// One logical request.
///
/// `items_per_page`, `max_pages` and `start_page` are non-zero by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
  pub method: Method,
  pub path: String,
  pub params: Params,
  pub items_per_page: NonZeroU32,
  pub max_pages: Option<NonZeroU32>,
  pub start_page: NonZeroU32,
  pub path_prefix: String,
  pub access_token: Option<String>,
  pub cache_control: CacheControl,
  pub num_retries: u32,
  /// Extra paths to invalidate after a successful mutation (`*` suffix = prefix match)
  pub also_invalidate: Vec<String>,
}

impl RequestDescriptor {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      params: Params::new(),
      items_per_page: DEFAULT_ITEMS_PER_PAGE,
      max_pages: None,
      start_page: NonZeroU32::MIN,
      path_prefix: String::new(),
      access_token: None,
      cache_control: CacheControl::default(),
      num_retries: DEFAULT_NUM_RETRIES,
      also_invalidate: Vec::new(),
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::Get, path)
  }

  pub fn post(path: impl Into<String>) -> Self {
    Self::new(Method::Post, path)
  }

  pub fn put(path: impl Into<String>) -> Self {
    Self::new(Method::Put, path)
  }

  pub fn delete(path: impl Into<String>) -> Self {
    Self::new(Method::Delete, path)
  }

  pub fn param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
    self.params.insert(key, value);
    self
  }

  pub fn params(mut self, params: Params) -> Self {
    self.params = params;
    self
  }

  pub fn items_per_page(mut self, items_per_page: NonZeroU32) -> Self {
    self.items_per_page = items_per_page;
    self
  }

  pub fn max_pages(mut self, max_pages: Option<NonZeroU32>) -> Self {
    self.max_pages = max_pages;
    self
  }

  pub fn start_page(mut self, start_page: NonZeroU32) -> Self {
    self.start_page = start_page;
    self
  }

  pub fn path_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.path_prefix = prefix.into();
    self
  }

  pub fn access_token(mut self, token: Option<String>) -> Self {
    self.access_token = token;
    self
  }

  pub fn ignore_cache(mut self, ignore: bool) -> Self {
    self.cache_control.ignore_cache = ignore;
    self
  }

  pub fn dont_cache(mut self, dont: bool) -> Self {
    self.cache_control.dont_cache = dont;
    self
  }

  pub fn num_retries(mut self, retries: u32) -> Self {
    self.num_retries = retries;
    self
  }

  pub fn also_invalidate<I, S>(mut self, paths: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.also_invalidate.extend(paths.into_iter().map(Into::into));
    self
  }

  /// Path including the configured prefix, as used for URLs and cache keys.
  pub fn full_path(&self) -> String {
    join_path(&self.path_prefix, &self.path)
  }
}

/// Prefix `path` unless it already starts with the prefix.
pub(crate) fn join_path(prefix: &str, path: &str) -> String {
  let prefix = prefix.trim_end_matches('/');
  if prefix.is_empty() || path.starts_with(prefix) {
    return path.to_string();
  }
  if path.starts_with('/') {
    format!("{}{}", prefix, path)
  } else {
    format!("{}/{}", prefix, path)
  }
}

/// Client-wide request settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDefaults {
  pub access_token: Option<String>,
  pub items_per_page: NonZeroU32,
  pub max_pages: Option<NonZeroU32>,
  pub path_prefix: String,
  pub num_retries: u32,
}

impl Default for RequestDefaults {
  fn default() -> Self {
    Self {
      access_token: None,
      items_per_page: DEFAULT_ITEMS_PER_PAGE,
      max_pages: None,
      path_prefix: String::new(),
      num_retries: DEFAULT_NUM_RETRIES,
    }
  }
}

/// Per-call settings that win over [`RequestDefaults`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOverrides {
  pub access_token: Option<String>,
  pub items_per_page: Option<NonZeroU32>,
  pub max_pages: Option<NonZeroU32>,
  pub start_page: Option<NonZeroU32>,
  pub path_prefix: Option<String>,
  pub num_retries: Option<u32>,
  pub ignore_cache: bool,
  pub dont_cache: bool,
}

impl RequestOverrides {
  /// Build overrides from counts given as plain integers, rejecting zeros.
  pub fn paging(items_per_page: Option<u32>, max_pages: Option<u32>) -> Result<Self, ApiError> {
    Ok(Self {
      items_per_page: non_zero("itemsPerPage", items_per_page)?,
      max_pages: non_zero("maxPages", max_pages)?,
      ..Self::default()
    })
  }
}

pub(crate) fn non_zero(name: &str, value: Option<u32>) -> Result<Option<NonZeroU32>, ApiError> {
  match value {
    None => Ok(None),
    Some(v) => NonZeroU32::new(v).map(Some).ok_or_else(|| {
      ApiError::new(
        ErrorKind::InvalidSyntax,
        format!("{} must be at least 1", name),
      )
    }),
  }
}

impl RequestDefaults {
  /// Start a descriptor for `method path` with these defaults and `overrides` applied.
  pub fn descriptor(
    &self,
    method: Method,
    path: impl Into<String>,
    overrides: &RequestOverrides,
  ) -> RequestDescriptor {
    RequestDescriptor::new(method, path)
      .access_token(
        overrides
          .access_token
          .clone()
          .or_else(|| self.access_token.clone()),
      )
      .items_per_page(overrides.items_per_page.unwrap_or(self.items_per_page))
      .max_pages(overrides.max_pages.or(self.max_pages))
      .start_page(overrides.start_page.unwrap_or(NonZeroU32::MIN))
      .path_prefix(
        overrides
          .path_prefix
          .clone()
          .unwrap_or_else(|| self.path_prefix.clone()),
      )
      .num_retries(overrides.num_retries.unwrap_or(self.num_retries))
      .ignore_cache(overrides.ignore_cache)
      .dont_cache(overrides.dont_cache)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_method_parsing() {
    assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
    assert_eq!("DELETE".parse::<Method>().unwrap(), Method::Delete);
    assert_eq!(
      "PATCH".parse::<Method>().unwrap_err().kind(),
      ErrorKind::InvalidSyntax
    );
  }

  #[test]
  fn test_full_path_joins_prefix_once() {
    let descriptor = RequestDescriptor::get("/api/v1/courses").path_prefix("/canvas/");
    assert_eq!(descriptor.full_path(), "/canvas/api/v1/courses");

    let already = RequestDescriptor::get("/canvas/api/v1/courses").path_prefix("/canvas");
    assert_eq!(already.full_path(), "/canvas/api/v1/courses");
  }

  #[test]
  fn test_overrides_win_over_defaults() {
    let defaults = RequestDefaults {
      access_token: Some("default".into()),
      num_retries: 5,
      ..RequestDefaults::default()
    };
    let overrides = RequestOverrides {
      access_token: Some("mine".into()),
      max_pages: NonZeroU32::new(2),
      ignore_cache: true,
      ..RequestOverrides::default()
    };

    let descriptor = defaults.descriptor(Method::Get, "/x", &overrides);
    assert_eq!(descriptor.access_token.as_deref(), Some("mine"));
    assert_eq!(descriptor.max_pages, NonZeroU32::new(2));
    assert_eq!(descriptor.items_per_page, DEFAULT_ITEMS_PER_PAGE);
    assert_eq!(descriptor.num_retries, 5);
    assert!(descriptor.cache_control.ignore_cache);
    assert!(!descriptor.cache_control.dont_cache);
  }

  #[test]
  fn test_zero_page_counts_rejected() {
    let err = RequestOverrides::paging(Some(0), None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidSyntax);
    assert!(RequestOverrides::paging(Some(3), Some(2)).is_ok());
  }
}

//! Injectable HTTP layer.
//!
//! The pager and coordinator only see [`Transport`]; the bundled implementation is
//! [`ReqwestTransport`]. A transport resolves with any HTTP response, error statuses
//! included; only failures to exchange a request at all are [`TransportError`]s.

mod http;

#[cfg(test)]
pub(crate) mod fake;

pub use http::ReqwestTransport;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LINK};
use thiserror::Error;
use url::Url;

use crate::request::Method;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
  pub method: Method,
  pub url: Url,
  /// Form-encoded body for non-GET requests
  pub body: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
  pub status: u16,
  pub headers: HeaderMap,
  pub body: String,
}

impl HttpResponse {
  pub fn new(status: u16, body: impl Into<String>) -> Self {
    Self {
      status,
      headers: HeaderMap::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
    if let Ok(value) = HeaderValue::from_str(value) {
      self.headers.append(name, value);
    }
    self
  }

  /// All `Link` header values joined into one list.
  pub fn link_header(&self) -> Option<String> {
    let values: Vec<&str> = self
      .headers
      .get_all(LINK)
      .iter()
      .filter_map(|v| v.to_str().ok())
      .collect();
    if values.is_empty() {
      None
    } else {
      Some(values.join(", "))
    }
  }
}

#[derive(Debug, Error)]
pub enum TransportError {
  #[error("request failed: {0}")]
  Request(#[from] reqwest::Error),

  #[error("invalid url: {0}")]
  InvalidUrl(#[from] url::ParseError),

  #[error("{0}")]
  Other(String),
}

impl TransportError {
  /// Whether sending the same request again could succeed.
  pub fn is_retryable(&self) -> bool {
    !matches!(self, TransportError::InvalidUrl(_))
  }
}

#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Resolve a configured host into a base URL; bare hosts default to https.
pub fn base_url(host: &str) -> Result<Url, url::ParseError> {
  if host.contains("://") {
    Url::parse(host)
  } else {
    Url::parse(&format!("https://{}", host))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_base_url() {
    assert_eq!(
      base_url("canvas.example.edu").unwrap().as_str(),
      "https://canvas.example.edu/"
    );
    assert_eq!(
      base_url("http://localhost:3000").unwrap().as_str(),
      "http://localhost:3000/"
    );
  }

  #[test]
  fn test_link_header_joins_values() {
    let response = HttpResponse::new(200, "[]")
      .with_header(LINK, "<https://a/x?page=1>; rel=\"current\"")
      .with_header(LINK, "<https://a/x?page=2>; rel=\"next\"");
    assert_eq!(
      response.link_header().unwrap(),
      "<https://a/x?page=1>; rel=\"current\", <https://a/x?page=2>; rel=\"next\""
    );
  }
}

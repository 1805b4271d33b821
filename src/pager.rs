//! Drives the HTTP call sequence for one logical request.
//!
//! The pager owns pagination policy only: it asks the caller-supplied `send_one` for each page,
//! retries transport failures, runs every response through the interpreter, follows
//! `rel="next"` cursors from the `Link` header, and merges the pages at the end.

use std::future::Future;
use std::num::NonZeroU32;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ApiError, ErrorKind};
use crate::interpret::interpret;
use crate::request::RequestDescriptor;
use crate::transport::{HttpResponse, TransportError};

/// Paging limits for one logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePlan {
  pub start_page: NonZeroU32,
  pub max_pages: Option<NonZeroU32>,
  pub num_retries: u32,
}

impl PagePlan {
  /// Only GET requests follow cursors; mutations are always a single exchange.
  pub fn for_request(descriptor: &RequestDescriptor) -> Self {
    Self {
      start_page: descriptor.start_page,
      max_pages: if descriptor.method.is_get() {
        descriptor.max_pages
      } else {
        Some(NonZeroU32::MIN)
      },
      num_retries: descriptor.num_retries,
    }
  }

  fn reached_limit(&self, pages_fetched: usize) -> bool {
    self
      .max_pages
      .is_some_and(|max| pages_fetched >= max.get() as usize)
  }
}

/// Which page to send: the first one, or the one a cursor points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
  pub number: u32,
  /// Next-page URL taken from the previous response
  pub cursor: Option<String>,
}

/// Raw page bodies collected for one logical fetch.
#[derive(Debug, Default)]
pub struct PageAccumulator {
  pages: Vec<Value>,
}

impl PageAccumulator {
  pub fn push(&mut self, page: Value) {
    self.pages.push(page);
  }

  pub fn len(&self) -> usize {
    self.pages.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pages.is_empty()
  }

  /// A single page is returned verbatim; several pages must all be lists and are
  /// concatenated.
  pub fn finish(mut self) -> Result<Value, ApiError> {
    if self.pages.len() <= 1 {
      return Ok(self.pages.pop().unwrap_or(Value::Null));
    }

    let mut merged = Vec::new();
    for (index, page) in self.pages.into_iter().enumerate() {
      match page {
        Value::Array(items) => merged.extend(items),
        _ => {
          return Err(ApiError::new(
            ErrorKind::MalformedResponse,
            format!(
              "Page {} of a paginated response was not a list, so the pages could not be combined.",
              index + 1
            ),
          ))
        }
      }
    }
    Ok(Value::Array(merged))
  }
}

/// Fetch every page of a request and merge them.
///
/// Fails on the first interpreted error; partial results are never returned.
pub async fn fetch_pages<F, Fut>(plan: &PagePlan, mut send_one: F) -> Result<Value, ApiError>
where
  F: FnMut(PageRequest) -> Fut,
  Fut: Future<Output = Result<HttpResponse, TransportError>>,
{
  let mut pages = PageAccumulator::default();
  let mut request = PageRequest {
    number: plan.start_page.get(),
    cursor: None,
  };

  loop {
    let response = send_with_retries(&mut send_one, &request, plan.num_retries).await?;
    if let Some(err) = interpret(response.status, &response.body) {
      return Err(err);
    }
    pages.push(parse_body(&response.body)?);
    debug!(page = request.number, "fetched page");

    let next = response.link_header().as_deref().and_then(next_link);
    match next {
      Some(cursor) if !plan.reached_limit(pages.len()) => {
        request = PageRequest {
          number: request.number + 1,
          cursor: Some(cursor),
        };
      }
      _ => break,
    }
  }

  pages.finish()
}

async fn send_with_retries<F, Fut>(
  send_one: &mut F,
  request: &PageRequest,
  num_retries: u32,
) -> Result<HttpResponse, ApiError>
where
  F: FnMut(PageRequest) -> Fut,
  Fut: Future<Output = Result<HttpResponse, TransportError>>,
{
  let mut attempt = 0;
  loop {
    match send_one(request.clone()).await {
      Ok(response) => return Ok(response),
      Err(err) if err.is_retryable() && attempt < num_retries => {
        attempt += 1;
        warn!(page = request.number, attempt, error = %err, "request failed, retrying");
      }
      Err(err) => {
        return Err(ApiError::new(
          ErrorKind::TransportFailure,
          format!(
            "We encountered an error when trying to send a network request ({}). If this issue persists, contact an admin.",
            err
          ),
        ))
      }
    }
  }
}

fn parse_body(body: &str) -> Result<Value, ApiError> {
  let trimmed = body.trim();
  if trimmed.is_empty() {
    return Ok(Value::Null);
  }
  // Canvas prefixes some JSON bodies with `while(1);` to defeat JSON hijacking.
  let trimmed = trimmed.strip_prefix("while(1);").unwrap_or(trimmed);
  serde_json::from_str(trimmed).map_err(|e| {
    ApiError::new(
      ErrorKind::MalformedResponse,
      format!("Canvas sent a response we could not parse: {}", e),
    )
  })
}

/// The `rel="next"` target of a `Link` header, if any.
pub fn next_link(header: &str) -> Option<String> {
  let mut rest = header;
  while let Some(open) = rest.find('<') {
    let after = &rest[open + 1..];
    let close = after.find('>')?;
    let target = &after[..close];
    let tail = &after[close + 1..];
    let params_end = tail.find('<').unwrap_or(tail.len());
    if tail[..params_end].split(';').any(is_next_rel) {
      return Some(target.trim().to_string());
    }
    rest = &tail[params_end..];
  }
  None
}

fn is_next_rel(param: &str) -> bool {
  let Some((name, value)) = param.split_once('=') else {
    return false;
  };
  name.trim().eq_ignore_ascii_case("rel")
    && value
      .trim()
      .trim_end_matches(',')
      .trim_matches('"')
      .split_whitespace()
      .any(|rel| rel.eq_ignore_ascii_case("next"))
}

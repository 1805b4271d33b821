//! Error taxonomy shared by every layer of the engine.
//!
//! Every failure surfaces as an [`ApiError`]: a machine-checkable [`ErrorKind`], the
//! human-readable message reported by whichever layer detected the problem, and the stack of
//! actions ("list the assignment groups in a course") that were in progress when it happened.
//! The composed sentence is only rendered when the error is displayed.

use std::error::Error as StdError;
use thiserror::Error;

/// Boxed error returned by endpoint core functions.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
  /// Network, DNS or TLS failure after the retry budget was spent
  TransportFailure,
  NotFound,
  /// Upstream rejected the request as malformed (400)
  InvalidSyntax,
  /// Body could not be parsed, or pages could not be merged
  MalformedResponse,
  /// An endpoint name could not be resolved to a bound core function
  UnresolvableBinding,
  /// An endpoint core function failed to produce a result
  EndpointMalfunction,
  Unauthenticated,
  InvalidAccessToken,
  InsufficientPermission,
  AccessDenied,
  Throttled,
  ConflictingState,
  MissingRelatedEntity,
  InternalUpstreamError,
  UnknownUpstreamError,
  /// An error response whose body could not be read at all
  UninterpretableError,
  /// A cache read, write or invalidation failed
  CacheFailure,
  MissingRequiredParam,
  /// A core function failed with an error outside this taxonomy
  EndpointFailure,
  /// A progress job is still running past the deadline (it may still complete)
  WaitTimeout,
  /// A progress job reported failure
  WaitFailure,
  /// Polling a progress job failed
  WaitCheckFailure,
}

impl ErrorKind {
  /// Stable presentation code for this kind.
  pub fn code(self) -> &'static str {
    match self {
      Self::TransportFailure => "CSR2",
      Self::NotFound => "CAPI15",
      Self::InvalidSyntax => "CAPI16",
      Self::MalformedResponse => "CAPI17",
      Self::UnresolvableBinding => "CAPI22",
      Self::EndpointMalfunction => "CAPI3",
      Self::Unauthenticated => "CANV5",
      Self::InvalidAccessToken => "CANV3",
      Self::InsufficientPermission => "CANV4",
      Self::AccessDenied => "CANV6",
      Self::Throttled => "CANV7",
      Self::ConflictingState => "CANV14",
      Self::MissingRelatedEntity => "CANV8",
      Self::InternalUpstreamError => "CANV500",
      Self::UnknownUpstreamError => "CANV12",
      Self::UninterpretableError => "CANV15",
      Self::CacheFailure => "CAPI13",
      Self::MissingRequiredParam => "CAPI24",
      Self::EndpointFailure => "CAPI2",
      Self::WaitTimeout => "CAPI11",
      Self::WaitFailure => "CAPI23",
      Self::WaitCheckFailure => "CAPI12",
    }
  }

  /// Whether the pager may retry a failure of this kind.
  pub fn is_retryable(self) -> bool {
    matches!(self, Self::TransportFailure)
  }
}

impl std::fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:?}", self)
  }
}

/// An error surfaced by the engine.
///
/// `Clone` so that one failed fetch can be handed to every caller that was coalesced onto it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", render(.message, .frames))]
pub struct ApiError {
  kind: ErrorKind,
  message: String,
  /// Actions in progress, innermost first
  frames: Vec<String>,
  status: Option<u16>,
}

impl ApiError {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
      frames: Vec::new(),
      status: None,
    }
  }

  pub fn cache(message: impl std::fmt::Display) -> Self {
    Self::new(
      ErrorKind::CacheFailure,
      format!("The request cache could not be updated: {}", message),
    )
  }

  /// Recover an `ApiError` from a boxed error, wrapping anything outside the taxonomy.
  pub fn from_boxed(err: BoxError) -> Self {
    match err.downcast::<ApiError>() {
      Ok(api) => *api,
      Err(other) => Self::new(ErrorKind::EndpointFailure, other.to_string()),
    }
  }

  pub fn with_status(mut self, status: u16) -> Self {
    self.status = Some(status);
    self
  }

  /// Record that this error happened while attempting `action`.
  pub fn with_frame(mut self, action: impl Into<String>) -> Self {
    self.frames.push(action.into());
    self
  }

  pub fn kind(&self) -> ErrorKind {
    self.kind
  }

  pub fn code(&self) -> &'static str {
    self.kind.code()
  }

  /// The message reported by the layer that detected the problem.
  pub fn message(&self) -> &str {
    &self.message
  }

  pub fn frames(&self) -> &[String] {
    &self.frames
  }

  /// HTTP status of the response the error was interpreted from, if any.
  pub fn status(&self) -> Option<u16> {
    self.status
  }
}

/// Compose the message with its context frames into one sentence.
///
/// Only the innermost action and the outermost one are named, so deep chains of nested
/// endpoint calls stay readable.
fn render(message: &str, frames: &[String]) -> String {
  match frames {
    [] => message.to_string(),
    [only] => format!("While attempting to {}, we ran into an error: {}", only, message),
    [inner, .., outer] => format!(
      "While attempting to {} (in order to {}), we ran into an error: {}",
      inner, outer, message
    ),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_message_without_frames() {
    let err = ApiError::new(ErrorKind::NotFound, "gone");
    assert_eq!(err.to_string(), "gone");
  }

  #[test]
  fn test_single_frame() {
    let err = ApiError::new(ErrorKind::NotFound, "gone").with_frame("get a course");
    assert_eq!(
      err.to_string(),
      "While attempting to get a course, we ran into an error: gone"
    );
  }

  #[test]
  fn test_nested_frames_compose_into_one_sentence() {
    let err = ApiError::new(ErrorKind::Throttled, "slow down")
      .with_frame("list enrollments")
      .with_frame("list students")
      .with_frame("build a roster");

    assert_eq!(
      err.to_string(),
      "While attempting to list enrollments (in order to build a roster), we ran into an error: slow down"
    );
    assert_eq!(err.kind(), ErrorKind::Throttled);
    assert_eq!(err.frames().len(), 3);
  }

  #[test]
  fn test_from_boxed_keeps_taxonomy_errors() {
    let boxed: BoxError = Box::new(ApiError::new(ErrorKind::AccessDenied, "no"));
    assert_eq!(ApiError::from_boxed(boxed).kind(), ErrorKind::AccessDenied);
  }

  #[test]
  fn test_from_boxed_wraps_foreign_errors() {
    let foreign = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let err = ApiError::from_boxed(Box::new(foreign));
    assert_eq!(err.kind(), ErrorKind::EndpointFailure);
    assert_eq!(err.code(), "CAPI2");
  }
}

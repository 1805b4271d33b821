//! Classification of upstream responses into the error taxonomy.
//!
//! Canvas reports failures as ordinary responses with assorted body shapes:
//!
//! - `{"errors": [{"message": "...", "error_code": "..."}]}`
//! - `{"errors": {"field": [{"message": "..."}]}}`
//! - `{"status": "unauthenticated", "errors": [...]}`
//! - `{"message": "Invalid access token."}`
//! - plain text, e.g. `403 Forbidden (Rate Limit Exceeded)`
//!
//! A 2xx response may still carry an error envelope, so success statuses are checked too.

use serde_json::Value;

use crate::error::{ApiError, ErrorKind};

const NOT_FOUND_MARKER: &str = "the specified resource does not exist";
const MAX_TEXT_IN_MESSAGE: usize = 200;

/// Domain-specific markers, checked after the generic ones.
const DOMAIN_MARKERS: &[(&[&str], ErrorKind, &str)] = &[
  (
    &["assignment", "does not exist"],
    ErrorKind::MissingRelatedEntity,
    "The assignment could not be found.",
  ),
  (
    &["assignment is missing"],
    ErrorKind::MissingRelatedEntity,
    "The assignment could not be found.",
  ),
  (
    &["assignment", "not found"],
    ErrorKind::MissingRelatedEntity,
    "The assignment could not be found.",
  ),
  (
    &["unknown student ids"],
    ErrorKind::MissingRelatedEntity,
    "The student could not be found.",
  ),
  (
    &["student", "not found"],
    ErrorKind::MissingRelatedEntity,
    "The student could not be found.",
  ),
  (
    &["user", "not found"],
    ErrorKind::MissingRelatedEntity,
    "The student could not be found.",
  ),
  (
    &["no valid file ids"],
    ErrorKind::MissingRelatedEntity,
    "None of the given file ids refer to uploaded files.",
  ),
  (
    &["attach at least one file"],
    ErrorKind::MissingRelatedEntity,
    "The submission did not include any files.",
  ),
  (
    &["invalid submission[submission_type]"],
    ErrorKind::InvalidSyntax,
    "Canvas did not accept the submission type.",
  ),
  (
    &["invalid submission type"],
    ErrorKind::InvalidSyntax,
    "Canvas did not accept the submission type.",
  ),
  (
    &["already in progress"],
    ErrorKind::ConflictingState,
    "A submission is already in progress.",
  ),
  (
    &["submission already exists"],
    ErrorKind::ConflictingState,
    "A submission is already in progress.",
  ),
];

/// Classify a response. Returns `None` only for 2xx responses without an error envelope.
pub fn interpret(status: u16, body: &str) -> Option<ApiError> {
  let success = (200..300).contains(&status);
  let trimmed = body.trim();
  let parsed: Option<Value> = if trimmed.is_empty() {
    None
  } else {
    serde_json::from_str(trimmed).ok()
  };

  let envelope = match parsed {
    Some(json) => {
      if success && !has_error_envelope(&json) {
        return None;
      }
      Envelope::from_json(&json)
    }
    // Non-JSON success bodies are left for the pager to reject.
    None if success => return None,
    None if trimmed.is_empty() => Envelope::default(),
    None => Envelope::from_text(trimmed),
  };

  Some(classify(status, &envelope).with_status(status))
}

fn has_error_envelope(json: &Value) -> bool {
  let Some(object) = json.as_object() else {
    return false;
  };
  let has_errors = match object.get("errors") {
    Some(Value::Array(items)) => !items.is_empty(),
    Some(Value::Object(fields)) => !fields.is_empty(),
    Some(Value::String(s)) => !s.is_empty(),
    _ => false,
  };
  let has_oauth_error = object.get("error").and_then(Value::as_str).is_some();
  let has_error_status = object
    .get("status")
    .and_then(Value::as_str)
    .is_some_and(is_error_status);
  has_errors || has_oauth_error || has_error_status
}

fn is_error_status(status: &str) -> bool {
  matches!(
    status,
    "unauthenticated"
      | "unauthorized"
      | "not_found"
      | "bad_request"
      | "internal_server_error"
      | "throttled"
  )
}

/// The parts of an error body that classification looks at.
#[derive(Debug, Default)]
struct Envelope {
  status: Option<String>,
  /// OAuth-style `{"error": "..."}` marker
  oauth_error: Option<String>,
  messages: Vec<String>,
  codes: Vec<String>,
  error_report: bool,
  /// Set when the body was not JSON
  text: Option<String>,
}

impl Envelope {
  fn from_json(json: &Value) -> Self {
    let mut envelope = Envelope::default();
    let Some(object) = json.as_object() else {
      if let Some(s) = json.as_str() {
        envelope.messages.push(s.to_string());
      }
      return envelope;
    };

    envelope.status = object
      .get("status")
      .and_then(Value::as_str)
      .map(String::from);
    envelope.oauth_error = object
      .get("error")
      .and_then(Value::as_str)
      .map(String::from);
    envelope.error_report = object.contains_key("error_report_id");
    if let Some(message) = object.get("message").and_then(Value::as_str) {
      envelope.messages.push(message.to_string());
    }
    if let Some(code) = object.get("error_code").and_then(Value::as_str) {
      envelope.codes.push(code.to_string());
    }

    match object.get("errors") {
      Some(Value::Array(errors)) => {
        for error in errors {
          envelope.collect_error(None, error);
        }
      }
      Some(Value::Object(fields)) => {
        for (field, errors) in fields {
          match errors {
            Value::Array(items) => {
              for error in items {
                envelope.collect_error(Some(field), error);
              }
            }
            other => envelope.collect_error(Some(field), other),
          }
        }
      }
      Some(Value::String(s)) => envelope.messages.push(s.clone()),
      _ => {}
    }

    envelope
  }

  fn from_text(text: &str) -> Self {
    Envelope {
      messages: vec![text.to_string()],
      text: Some(text.to_string()),
      ..Envelope::default()
    }
  }

  fn collect_error(&mut self, field: Option<&str>, error: &Value) {
    let message = match error {
      Value::String(s) => Some(s.clone()),
      Value::Object(object) => {
        if let Some(code) = object.get("error_code").and_then(Value::as_str) {
          self.codes.push(code.to_string());
        }
        object
          .get("message")
          .and_then(Value::as_str)
          .map(String::from)
      }
      _ => None,
    };
    if let Some(message) = message {
      self.messages.push(match field {
        Some(field) => format!("{}: {}", field, message),
        None => message,
      });
    }
  }

  fn mentions(&self, needle: &str) -> bool {
    self
      .messages
      .iter()
      .any(|m| m.to_lowercase().contains(needle))
  }

  fn mentions_all(&self, needles: &[&str]) -> bool {
    self.messages.iter().any(|m| {
      let lower = m.to_lowercase();
      needles.iter().all(|n| lower.contains(n))
    })
  }

  fn has_code(&self, code: &str) -> bool {
    self.codes.iter().any(|c| c.eq_ignore_ascii_case(code))
  }

  fn status_is(&self, status: &str) -> bool {
    self.status.as_deref() == Some(status)
  }

  fn oauth_error_is(&self, error: &str) -> bool {
    self.oauth_error.as_deref() == Some(error)
  }

  fn joined(&self) -> String {
    self.messages.join(", ")
  }

  fn upstream_said(&self) -> String {
    if self.messages.is_empty() {
      String::new()
    } else {
      format!(" Canvas said: \"{}\"", truncate(&self.joined()))
    }
  }
}

fn classify(status: u16, env: &Envelope) -> ApiError {
  if env.mentions(NOT_FOUND_MARKER) || env.status_is("not_found") {
    return ApiError::new(
      ErrorKind::NotFound,
      "The requested resource could not be found. It may have been deleted.",
    );
  }

  if env.mentions("cannot be unpublished") || env.mentions("can't unpublish") {
    return ApiError::new(
      ErrorKind::ConflictingState,
      "The front page of a course cannot be unpublished.",
    );
  }

  if env.has_code("internal_server_error")
    || env.status_is("internal_server_error")
    || env.error_report
  {
    return ApiError::new(
      ErrorKind::InternalUpstreamError,
      format!(
        "Canvas encountered an internal error while processing the request.{}",
        env.upstream_said()
      ),
    );
  }

  if env.status_is("unauthenticated") || env.mentions("user authorization required") {
    return ApiError::new(
      ErrorKind::Unauthenticated,
      "The request was not authenticated. Please log in again.",
    );
  }

  // The explicit OAuth marker wins over a bare 401.
  if env.oauth_error_is("access_denied")
    || env.mentions("access denied")
    || env.has_code("access_denied")
  {
    return ApiError::new(
      ErrorKind::AccessDenied,
      "Canvas denied access to this resource.",
    );
  }

  if env.mentions("invalid access token") {
    return ApiError::new(
      ErrorKind::InvalidAccessToken,
      "The access token used for this request is invalid or has expired.",
    );
  }
  if status == 401
    || env.status_is("unauthorized")
    || env.has_code("unauthorized")
    || env.mentions("not authorized")
  {
    return ApiError::new(
      ErrorKind::InsufficientPermission,
      "You are not authorized to perform this action.",
    );
  }

  if status == 429 || env.status_is("throttled") || env.mentions("rate limit exceeded") {
    return ApiError::new(
      ErrorKind::Throttled,
      "Canvas is throttling requests. Please wait and try again.",
    );
  }

  for (needles, kind, message) in DOMAIN_MARKERS {
    if env.mentions_all(needles) {
      return ApiError::new(*kind, *message);
    }
  }

  match status {
    400 => {
      let message = if env.messages.is_empty() {
        "The request was malformed.".to_string()
      } else {
        env.joined()
      };
      ApiError::new(ErrorKind::InvalidSyntax, message)
    }
    404 => ApiError::new(
      ErrorKind::NotFound,
      format!("The requested endpoint could not be found.{}", env.upstream_said()),
    ),
    500 => ApiError::new(
      ErrorKind::InternalUpstreamError,
      format!(
        "Canvas encountered an internal error while processing the request.{}",
        env.upstream_said()
      ),
    ),
    _ => match &env.text {
      Some(text) => ApiError::new(
        ErrorKind::UninterpretableError,
        format!(
          "Canvas responded with status {} and a body we could not interpret: \"{}\"",
          status,
          truncate(text)
        ),
      ),
      None => ApiError::new(
        ErrorKind::UnknownUpstreamError,
        format!(
          "Canvas responded with an unrecognized error (status {}).{}",
          status,
          env.upstream_said()
        ),
      ),
    },
  }
}

fn truncate(text: &str) -> String {
  match text.char_indices().nth(MAX_TEXT_IN_MESSAGE) {
    Some((index, _)) => format!("{}...", &text[..index]),
    None => text.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn kind_of(status: u16, body: &str) -> Option<ErrorKind> {
    interpret(status, body).map(|e| e.kind())
  }

  #[test]
  fn test_success_without_envelope_is_not_an_error() {
    assert!(interpret(200, r#"[{"id": 1}]"#).is_none());
    assert!(interpret(201, r#"{"id": 1, "status": "active"}"#).is_none());
    assert!(interpret(204, "").is_none());
  }

  #[test]
  fn test_success_with_envelope_is_an_error() {
    let err = interpret(200, r#"{"errors": [{"message": "The specified resource does not exist."}]}"#)
      .unwrap();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.status(), Some(200));

    assert_eq!(
      kind_of(200, r#"{"errors": [{"message": "something odd"}]}"#),
      Some(ErrorKind::UnknownUpstreamError)
    );
  }

  #[test]
  fn test_invalid_access_token() {
    assert_eq!(
      kind_of(401, r#"{"message": "Invalid access token."}"#),
      Some(ErrorKind::InvalidAccessToken)
    );
    assert_eq!(
      kind_of(
        401,
        r#"{"status": "unauthorized", "errors": [{"message": "Invalid access token."}]}"#
      ),
      Some(ErrorKind::InvalidAccessToken)
    );
  }

  #[test]
  fn test_insufficient_permission() {
    assert_eq!(
      kind_of(
        401,
        r#"{"status": "unauthorized", "errors": [{"message": "user not authorized to perform that action"}]}"#
      ),
      Some(ErrorKind::InsufficientPermission)
    );
  }

  #[test]
  fn test_unauthenticated() {
    assert_eq!(
      kind_of(
        401,
        r#"{"status": "unauthenticated", "errors": [{"message": "user authorization required"}]}"#
      ),
      Some(ErrorKind::Unauthenticated)
    );
  }

  #[test]
  fn test_malformed_request_aggregates_messages() {
    let err = interpret(
      400,
      r#"{"errors": [{"message": "foo: bar"}, {"message": "baz: qux"}]}"#,
    )
    .unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidSyntax);
    assert_eq!(err.message(), "foo: bar, baz: qux");
  }

  #[test]
  fn test_field_errors_are_prefixed() {
    let err = interpret(
      400,
      r#"{"errors": {"name": [{"attribute": "name", "message": "can't be blank"}]}}"#,
    )
    .unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidSyntax);
    assert_eq!(err.message(), "name: can't be blank");
  }

  #[test]
  fn test_throttled_plain_text() {
    assert_eq!(
      kind_of(403, "403 Forbidden (Rate Limit Exceeded)"),
      Some(ErrorKind::Throttled)
    );
    assert_eq!(kind_of(429, ""), Some(ErrorKind::Throttled));
  }

  #[test]
  fn test_priority_not_found_beats_status() {
    assert_eq!(
      kind_of(
        401,
        r#"{"errors": [{"message": "The specified resource does not exist."}]}"#
      ),
      Some(ErrorKind::NotFound)
    );
  }

  #[test]
  fn test_internal_error_markers() {
    assert_eq!(
      kind_of(
        500,
        r#"{"errors": [{"message": "An error occurred."}], "error_report_id": 42}"#
      ),
      Some(ErrorKind::InternalUpstreamError)
    );
    assert_eq!(
      kind_of(
        422,
        r#"{"errors": [{"message": "boom", "error_code": "internal_server_error"}]}"#
      ),
      Some(ErrorKind::InternalUpstreamError)
    );
  }

  #[test]
  fn test_domain_markers() {
    assert_eq!(
      kind_of(400, r#"{"errors": [{"message": "No valid file IDs given"}]}"#),
      Some(ErrorKind::MissingRelatedEntity)
    );
    assert_eq!(
      kind_of(
        409,
        r#"{"errors": [{"message": "a quiz submission is already in progress"}]}"#
      ),
      Some(ErrorKind::ConflictingState)
    );
    assert_eq!(
      kind_of(400, r#"{"message": "Can't unpublish the front page; it cannot be unpublished"}"#),
      Some(ErrorKind::ConflictingState)
    );
  }

  #[test]
  fn test_access_denied() {
    assert_eq!(
      kind_of(403, r#"{"errors": [{"message": "Access denied"}]}"#),
      Some(ErrorKind::AccessDenied)
    );
  }

  #[test]
  fn test_oauth_access_denied() {
    assert_eq!(
      kind_of(403, r#"{"error": "access_denied"}"#),
      Some(ErrorKind::AccessDenied)
    );
    assert_eq!(
      kind_of(401, r#"{"error": "access_denied"}"#),
      Some(ErrorKind::AccessDenied)
    );
    assert_eq!(
      kind_of(200, r#"{"error": "access_denied"}"#),
      Some(ErrorKind::AccessDenied)
    );
  }

  #[test]
  fn test_throttled_status_marker() {
    assert_eq!(
      kind_of(403, r#"{"status": "throttled", "message": "slow"}"#),
      Some(ErrorKind::Throttled)
    );
    assert_eq!(
      kind_of(200, r#"{"status": "throttled"}"#),
      Some(ErrorKind::Throttled)
    );
  }

  #[test]
  fn test_any_401_is_a_permission_problem() {
    assert_eq!(
      kind_of(401, r#"{"errors": [{"message": "nope"}]}"#),
      Some(ErrorKind::InsufficientPermission)
    );
    assert_eq!(kind_of(401, ""), Some(ErrorKind::InsufficientPermission));
    assert_eq!(
      kind_of(
        403,
        r#"{"errors": [{"message": "nope", "error_code": "unauthorized"}]}"#
      ),
      Some(ErrorKind::InsufficientPermission)
    );
    // Invalid token is still told apart inside the 401 case.
    assert_eq!(
      kind_of(401, r#"{"errors": [{"message": "nope"}], "message": "Invalid access token."}"#),
      Some(ErrorKind::InvalidAccessToken)
    );
  }

  #[test]
  fn test_missing_assignment_and_student() {
    let err = interpret(400, r#"{"errors": [{"message": "assignment is missing"}]}"#).unwrap();
    assert_eq!(err.kind(), ErrorKind::MissingRelatedEntity);
    assert_eq!(err.message(), "The assignment could not be found.");

    let err = interpret(400, r#"{"errors": [{"message": "unknown student ids: 5"}]}"#).unwrap();
    assert_eq!(err.kind(), ErrorKind::MissingRelatedEntity);
    assert_eq!(err.message(), "The student could not be found.");
  }

  #[test]
  fn test_empty_errors_on_success_is_not_an_error() {
    assert!(interpret(200, r#"{"id": 1, "errors": []}"#).is_none());
    assert!(interpret(200, r#"{"id": 1, "errors": {}}"#).is_none());
    assert!(interpret(200, r#"{"id": 1, "error": null}"#).is_none());
  }

  #[test]
  fn test_generic_fallbacks() {
    assert_eq!(kind_of(404, "<html>Not Found</html>"), Some(ErrorKind::NotFound));
    assert_eq!(kind_of(500, ""), Some(ErrorKind::InternalUpstreamError));
    assert_eq!(
      kind_of(418, r#"{"errors": [{"message": "teapot"}]}"#),
      Some(ErrorKind::UnknownUpstreamError)
    );
  }

  #[test]
  fn test_unreadable_error_body() {
    let err = interpret(502, "<html>Bad Gateway</html>").unwrap();
    assert_eq!(err.kind(), ErrorKind::UninterpretableError);
    assert!(err.message().contains("Bad Gateway"));
  }
}

//! Waiting on Canvas progress objects for long-running jobs.

use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::endpoint::Api;
use crate::error::{ApiError, ErrorKind};
use crate::request::{Method, RequestOverrides};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
  pub timeout: Duration,
  /// Delay between status checks
  pub refresh: Duration,
}

impl Default for WaitOptions {
  fn default() -> Self {
    Self {
      timeout: Duration::from_secs(2 * 60),
      refresh: Duration::from_millis(250),
    }
  }
}

/// Poll `progress_url` until the job completes, fails or the timeout passes.
///
/// Every check bypasses the cache. Returns the final progress object.
pub async fn wait_for_completion(
  api: &Api,
  progress_url: &str,
  options: &WaitOptions,
) -> Result<Value, ApiError> {
  let overrides = RequestOverrides {
    path_prefix: Some(String::new()),
    ignore_cache: true,
    dont_cache: true,
    ..RequestOverrides::default()
  };
  let descriptor = api
    .defaults()
    .descriptor(Method::Get, progress_url, &overrides);
  let deadline = Instant::now() + options.timeout;

  loop {
    let progress = api.visit(descriptor.clone()).await.map_err(|err| {
      ApiError::new(
        ErrorKind::WaitCheckFailure,
        format!(
          "We could not check on the status of a task we were waiting for: {}",
          err.message()
        ),
      )
    })?;

    let state = progress.get("workflow_state").and_then(Value::as_str);
    debug!(url = progress_url, state = ?state, "checked progress");
    match state {
      Some("completed") => return Ok(progress),
      Some("failed") => {
        let reason = progress
          .get("message")
          .and_then(Value::as_str)
          .unwrap_or("no reason was given");
        return Err(ApiError::new(
          ErrorKind::WaitFailure,
          format!("A task we were waiting for failed: {}", reason),
        ));
      }
      _ => {}
    }

    let now = Instant::now();
    if now >= deadline {
      return Err(ApiError::new(
        ErrorKind::WaitTimeout,
        "A task took too long to finish. It may still complete on its own; check back later.",
      ));
    }
    tokio::time::sleep(options.refresh.min(deadline - now)).await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::endpoint::{test_api, EndpointRegistry};
  use crate::transport::fake::FakeCanvas;
  use crate::transport::HttpResponse;
  use serde_json::json;
  use std::sync::Arc;

  const PROGRESS: &str = "/api/v1/progress/7";

  fn quick() -> WaitOptions {
    WaitOptions {
      timeout: Duration::from_millis(200),
      refresh: Duration::from_millis(5),
    }
  }

  #[tokio::test]
  async fn test_waits_until_completed() {
    let fake = Arc::new(
      FakeCanvas::new().with_object(PROGRESS, json!({"id": 7, "workflow_state": "completed"})),
    );
    for state in ["queued", "running"] {
      fake.script(
        Method::Get,
        PROGRESS,
        HttpResponse::new(200, json!({"id": 7, "workflow_state": state}).to_string()),
      );
    }
    let api = test_api(&fake, EndpointRegistry::new());

    let done = wait_for_completion(&api, PROGRESS, &quick()).await.unwrap();
    assert_eq!(done["workflow_state"], json!("completed"));
    assert_eq!(fake.request_count(), 3);
    assert!(api.coordinator().cached_paths().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_accepts_absolute_progress_url() {
    let fake = Arc::new(
      FakeCanvas::new().with_object(PROGRESS, json!({"workflow_state": "completed"})),
    );
    let api = test_api(&fake, EndpointRegistry::new());
    let url = format!("https://canvas.test{}", PROGRESS);
    wait_for_completion(&api, &url, &quick()).await.unwrap();
  }

  #[tokio::test]
  async fn test_failed_job() {
    let fake = Arc::new(FakeCanvas::new().with_object(
      PROGRESS,
      json!({"workflow_state": "failed", "message": "import aborted"}),
    ));
    let api = test_api(&fake, EndpointRegistry::new());
    let err = wait_for_completion(&api, PROGRESS, &quick())
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WaitFailure);
    assert!(err.message().contains("import aborted"));
  }

  #[tokio::test]
  async fn test_times_out() {
    let fake = Arc::new(
      FakeCanvas::new().with_object(PROGRESS, json!({"workflow_state": "running"})),
    );
    let api = test_api(&fake, EndpointRegistry::new());
    let options = WaitOptions {
      timeout: Duration::from_millis(30),
      refresh: Duration::from_millis(5),
    };
    let err = wait_for_completion(&api, PROGRESS, &options)
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WaitTimeout);
    assert!(err.message().contains("may still complete"));
    assert!(fake.request_count() > 1);
  }

  #[tokio::test]
  async fn test_unreachable_progress_is_a_check_failure() {
    let fake = Arc::new(FakeCanvas::new());
    let api = test_api(&fake, EndpointRegistry::new());
    let err = wait_for_completion(&api, PROGRESS, &quick())
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WaitCheckFailure);
  }
}

//! In-process stand-in for a Canvas server, used by the test modules.
//!
//! Collections page with `page`/`per_page` and advertise the next page in a `Link` header;
//! objects support GET/PUT/DELETE; POST appends to a collection. Responses can also be
//! scripted per (method, path), and the first N sends can be made to fail at the transport
//! level.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::LINK;
use serde_json::{json, Value};

use super::{HttpRequest, HttpResponse, Transport, TransportError};
use crate::request::Method;

pub(crate) const NOT_FOUND_BODY: &str =
  r#"{"errors":[{"message":"The specified resource does not exist."}]}"#;

/// `count` objects shaped like `{"id": n, "name": "item n"}`.
pub(crate) fn items(count: u64) -> Vec<Value> {
  (1..=count)
    .map(|i| json!({ "id": i, "name": format!("item {}", i) }))
    .collect()
}

#[derive(Default)]
struct FakeState {
  collections: HashMap<String, Vec<Value>>,
  objects: HashMap<String, Value>,
  scripted: HashMap<(Method, String), VecDeque<HttpResponse>>,
  transport_failures: u32,
  requests: Vec<HttpRequest>,
  next_id: u64,
}

pub(crate) struct FakeCanvas {
  state: Mutex<FakeState>,
  delay: Duration,
}

impl FakeCanvas {
  pub(crate) fn new() -> Self {
    Self {
      state: Mutex::new(FakeState {
        next_id: 1000,
        ..FakeState::default()
      }),
      delay: Duration::ZERO,
    }
  }

  /// Delay every response, to widen the window for concurrent callers.
  pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub(crate) fn with_collection(self, path: &str, items: Vec<Value>) -> Self {
    self.state().collections.insert(path.to_string(), items);
    self
  }

  pub(crate) fn with_object(self, path: &str, value: Value) -> Self {
    self.state().objects.insert(path.to_string(), value);
    self
  }

  /// Serve `response` for the next `method path` instead of the simulated behavior.
  pub(crate) fn script(&self, method: Method, path: &str, response: HttpResponse) {
    self
      .state()
      .scripted
      .entry((method, path.to_string()))
      .or_default()
      .push_back(response);
  }

  /// Fail the next `times` sends as if the network were down.
  pub(crate) fn fail_transport(&self, times: u32) {
    self.state().transport_failures = times;
  }

  pub(crate) fn set_object(&self, path: &str, value: Value) {
    self.state().objects.insert(path.to_string(), value);
  }

  pub(crate) fn requests(&self) -> Vec<HttpRequest> {
    self.state().requests.clone()
  }

  pub(crate) fn request_count(&self) -> usize {
    self.state().requests.len()
  }

  /// Number of requests sent for `method path`.
  pub(crate) fn count(&self, method: Method, path: &str) -> usize {
    self
      .state()
      .requests
      .iter()
      .filter(|r| r.method == method && r.url.path() == path)
      .count()
  }

  fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
    self.state.lock().unwrap()
  }
}

#[async_trait]
impl Transport for FakeCanvas {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
    {
      let mut state = self.state();
      state.requests.push(request.clone());
      if state.transport_failures > 0 {
        state.transport_failures -= 1;
        return Err(TransportError::Other("connection reset by peer".into()));
      }
    }

    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }

    let mut state = self.state();
    let path = request.url.path().to_string();
    if let Some(response) = state
      .scripted
      .get_mut(&(request.method, path.clone()))
      .and_then(VecDeque::pop_front)
    {
      return Ok(response);
    }
    Ok(state.respond(&request, &path))
  }
}

impl FakeState {
  fn respond(&mut self, request: &HttpRequest, path: &str) -> HttpResponse {
    match request.method {
      Method::Get => self.get(request, path),
      Method::Post => self.post(request, path),
      Method::Put => self.put(request, path),
      Method::Delete => self.delete(path),
    }
  }

  fn get(&self, request: &HttpRequest, path: &str) -> HttpResponse {
    if let Some(items) = self.collections.get(path) {
      let query: HashMap<String, String> = request.url.query_pairs().into_owned().collect();
      let per_page: usize = query
        .get("per_page")
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);
      let page: usize = query
        .get("page")
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);

      let start = (page - 1) * per_page;
      let end = (start + per_page).min(items.len());
      let slice = if start < items.len() {
        items[start..end].to_vec()
      } else {
        Vec::new()
      };

      let mut current = request.url.clone();
      current.set_query(Some(&format!("page={}&per_page={}", page, per_page)));
      let mut response = HttpResponse::new(200, Value::Array(slice).to_string())
        .with_header(LINK, &format!("<{}>; rel=\"current\"", current));
      if end < items.len() {
        let mut next = request.url.clone();
        next.set_query(Some(&format!("page={}&per_page={}", page + 1, per_page)));
        response = response.with_header(LINK, &format!("<{}>; rel=\"next\"", next));
      }
      return response;
    }

    match self.objects.get(path) {
      Some(object) => HttpResponse::new(200, object.to_string()),
      None => HttpResponse::new(404, NOT_FOUND_BODY),
    }
  }

  fn post(&mut self, request: &HttpRequest, path: &str) -> HttpResponse {
    let id = self.next_id;
    self.next_id += 1;

    let mut item = form_fields(request);
    item.insert("id".into(), json!(id));
    let item = Value::Object(item);

    self
      .collections
      .entry(path.to_string())
      .or_default()
      .push(item.clone());
    self
      .objects
      .insert(format!("{}/{}", path, id), item.clone());
    HttpResponse::new(200, item.to_string())
  }

  fn put(&mut self, request: &HttpRequest, path: &str) -> HttpResponse {
    let Some(Value::Object(object)) = self.objects.get_mut(path) else {
      return HttpResponse::new(404, NOT_FOUND_BODY);
    };
    object.extend(form_fields(request));
    HttpResponse::new(200, Value::Object(object.clone()).to_string())
  }

  fn delete(&mut self, path: &str) -> HttpResponse {
    let Some(removed) = self.objects.remove(path) else {
      return HttpResponse::new(404, NOT_FOUND_BODY);
    };
    if let Some((parent, _)) = path.rsplit_once('/') {
      if let Some(items) = self.collections.get_mut(parent) {
        items.retain(|item| item.get("id") != removed.get("id"));
      }
    }
    HttpResponse::new(200, removed.to_string())
  }
}

fn form_fields(request: &HttpRequest) -> serde_json::Map<String, Value> {
  let body = request.body.as_deref().unwrap_or("");
  url::form_urlencoded::parse(body.as_bytes())
    .filter(|(k, _)| k != "access_token")
    .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
    .collect()
}

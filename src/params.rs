//! Request parameters and their wire encoding.
//!
//! Parameters form an owned tree of [`ParamValue`]s. A value of [`ParamValue::Omitted`] means
//! "leave this parameter out"; it is distinct from every legitimate falsy value (`0`, `false`,
//! `""`, null) and is stripped at every depth before anything is sent or hashed.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use url::form_urlencoded::byte_serialize;

use crate::request::RequestDescriptor;

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
  /// Exclude the parameter entirely
  Omitted,
  Null,
  Bool(bool),
  Int(i64),
  Float(f64),
  Str(String),
  List(Vec<ParamValue>),
  Map(Params),
}

impl ParamValue {
  pub fn is_omitted(&self) -> bool {
    matches!(self, ParamValue::Omitted)
  }

  /// Falsy values are null, `false`, zero, NaN and the empty string.
  pub fn is_truthy(&self) -> bool {
    match self {
      ParamValue::Omitted | ParamValue::Null => false,
      ParamValue::Bool(b) => *b,
      ParamValue::Int(i) => *i != 0,
      ParamValue::Float(f) => *f != 0.0 && !f.is_nan(),
      ParamValue::Str(s) => !s.is_empty(),
      ParamValue::List(_) | ParamValue::Map(_) => true,
    }
  }

  /// Keep the value if it is truthy, otherwise omit the parameter.
  pub fn truthy_or_omitted(self) -> Self {
    if self.is_truthy() {
      self
    } else {
      ParamValue::Omitted
    }
  }

  /// Copy of the value with every omitted entry removed, or `None` if the value itself is
  /// omitted.
  pub fn without_omitted(&self) -> Option<ParamValue> {
    match self {
      ParamValue::Omitted => None,
      ParamValue::List(items) => Some(ParamValue::List(
        items.iter().filter_map(ParamValue::without_omitted).collect(),
      )),
      ParamValue::Map(params) => Some(ParamValue::Map(params.without_omitted())),
      other => Some(other.clone()),
    }
  }

  /// Canonical JSON form: omitted entries removed and object keys sorted.
  pub fn to_canonical_json(&self) -> Value {
    match self {
      ParamValue::Omitted | ParamValue::Null => Value::Null,
      ParamValue::Bool(b) => Value::Bool(*b),
      ParamValue::Int(i) => Value::from(*i),
      ParamValue::Float(f) => Value::from(*f),
      ParamValue::Str(s) => Value::String(s.clone()),
      ParamValue::List(items) => Value::Array(
        items
          .iter()
          .filter(|v| !v.is_omitted())
          .map(ParamValue::to_canonical_json)
          .collect(),
      ),
      ParamValue::Map(params) => params.to_canonical_json(),
    }
  }

  fn scalar_text(&self) -> Option<String> {
    match self {
      ParamValue::Null => Some(String::new()),
      ParamValue::Bool(b) => Some(b.to_string()),
      ParamValue::Int(i) => Some(i.to_string()),
      ParamValue::Float(f) => Some(f.to_string()),
      ParamValue::Str(s) => Some(s.clone()),
      _ => None,
    }
  }
}

macro_rules! int_param {
  ($($ty:ty),*) => {
    $(
      impl From<$ty> for ParamValue {
        fn from(value: $ty) -> Self {
          ParamValue::Int(i64::from(value))
        }
      }
    )*
  };
}

int_param!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for ParamValue {
  fn from(value: u64) -> Self {
    i64::try_from(value)
      .map(ParamValue::Int)
      .unwrap_or_else(|_| ParamValue::Str(value.to_string()))
  }
}

impl From<bool> for ParamValue {
  fn from(value: bool) -> Self {
    ParamValue::Bool(value)
  }
}

impl From<f64> for ParamValue {
  fn from(value: f64) -> Self {
    ParamValue::Float(value)
  }
}

impl From<&str> for ParamValue {
  fn from(value: &str) -> Self {
    ParamValue::Str(value.to_string())
  }
}

impl From<String> for ParamValue {
  fn from(value: String) -> Self {
    ParamValue::Str(value)
  }
}

impl From<DateTime<Utc>> for ParamValue {
  fn from(value: DateTime<Utc>) -> Self {
    ParamValue::Str(value.to_rfc3339_opts(SecondsFormat::Millis, true))
  }
}

impl From<Params> for ParamValue {
  fn from(value: Params) -> Self {
    ParamValue::Map(value)
  }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
  fn from(value: Vec<T>) -> Self {
    ParamValue::List(value.into_iter().map(Into::into).collect())
  }
}

/// `None` means the parameter is omitted.
impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
  fn from(value: Option<T>) -> Self {
    value.map_or(ParamValue::Omitted, Into::into)
  }
}

impl From<&Value> for ParamValue {
  fn from(value: &Value) -> Self {
    match value {
      Value::Null => ParamValue::Null,
      Value::Bool(b) => ParamValue::Bool(*b),
      Value::Number(n) => match n.as_i64() {
        Some(i) => ParamValue::Int(i),
        None => ParamValue::Float(n.as_f64().unwrap_or(f64::NAN)),
      },
      Value::String(s) => ParamValue::Str(s.clone()),
      Value::Array(items) => ParamValue::List(items.iter().map(ParamValue::from).collect()),
      Value::Object(map) => ParamValue::Map(
        map
          .iter()
          .map(|(k, v)| (k.clone(), ParamValue::from(v)))
          .collect(),
      ),
    }
  }
}

/// A list that keeps only truthy elements and omits the parameter if none remain.
pub fn truthy_elements_or_omitted<T: Into<ParamValue>>(items: Vec<T>) -> ParamValue {
  let kept: Vec<ParamValue> = items
    .into_iter()
    .map(Into::into)
    .filter(ParamValue::is_truthy)
    .collect();
  if kept.is_empty() {
    ParamValue::Omitted
  } else {
    ParamValue::List(kept)
  }
}

/// Insertion-ordered parameter map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
  entries: Vec<(String, ParamValue)>,
}

impl Params {
  pub fn new() -> Self {
    Self::default()
  }

  /// Set `key`, replacing an existing value in place.
  pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
    let key = key.into();
    let value = value.into();
    match self.entries.iter_mut().find(|(k, _)| *k == key) {
      Some(entry) => entry.1 = value,
      None => self.entries.push((key, value)),
    }
  }

  pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
    self.insert(key, value);
    self
  }

  pub fn get(&self, key: &str) -> Option<&ParamValue> {
    self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
  }

  pub fn remove(&mut self, key: &str) -> Option<ParamValue> {
    let index = self.entries.iter().position(|(k, _)| k == key)?;
    Some(self.entries.remove(index).1)
  }

  /// Whether `key` is present with a value that will actually be sent.
  pub fn has(&self, key: &str) -> bool {
    self.get(key).is_some_and(|v| !v.is_omitted())
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
    self.entries.iter().map(|(k, v)| (k.as_str(), v))
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn without_omitted(&self) -> Params {
    self
      .entries
      .iter()
      .filter_map(|(k, v)| v.without_omitted().map(|v| (k.clone(), v)))
      .collect()
  }

  pub fn to_canonical_json(&self) -> Value {
    let sorted: BTreeMap<&str, Value> = self
      .entries
      .iter()
      .filter(|(_, v)| !v.is_omitted())
      .map(|(k, v)| (k.as_str(), v.to_canonical_json()))
      .collect();
    Value::Object(
      sorted
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect(),
    )
  }
}

impl<K: Into<String>> FromIterator<(K, ParamValue)> for Params {
  fn from_iter<I: IntoIterator<Item = (K, ParamValue)>>(iter: I) -> Self {
    let mut params = Params::new();
    for (k, v) in iter {
      params.insert(k, v);
    }
    params
  }
}

/// Flattened key/value pairs as they go over the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireParams {
  pairs: Vec<(String, String)>,
}

impl WireParams {
  pub fn pairs(&self) -> &[(String, String)] {
    &self.pairs
  }

  pub fn is_empty(&self) -> bool {
    self.pairs.is_empty()
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self
      .pairs
      .iter()
      .find(|(k, _)| k == key)
      .map(|(_, v)| v.as_str())
  }

  /// `key=value&...` with bracket characters kept literal in keys and values URL-encoded.
  pub fn to_query_string(&self) -> String {
    self
      .pairs
      .iter()
      .map(|(k, v)| format!("{}={}", encode_key(k), encode_component(v)))
      .collect::<Vec<_>>()
      .join("&")
  }

  fn push(&mut self, key: String, value: String) {
    self.pairs.push((key, value));
  }
}

/// Encode a descriptor's parameters for the wire.
///
/// Injects `access_token` when the descriptor has a token and the params don't already carry
/// one; for GET requests also injects `per_page` (and `page` when starting past page 1).
pub fn encode(descriptor: &RequestDescriptor) -> WireParams {
  let mut params = descriptor.params.clone();

  if let Some(token) = &descriptor.access_token {
    if !params.has("access_token") {
      params.insert("access_token", token.as_str());
    }
  }

  if descriptor.method.is_get() {
    if !params.has("per_page") {
      params.insert("per_page", descriptor.items_per_page.get());
    }
    if descriptor.start_page.get() > 1 && !params.has("page") {
      params.insert("page", descriptor.start_page.get());
    }
  }

  let mut wire = WireParams::default();
  for (key, value) in params.iter() {
    flatten(key.to_string(), value, &mut wire);
  }
  wire
}

fn flatten(key: String, value: &ParamValue, out: &mut WireParams) {
  match value {
    ParamValue::Omitted => {}
    ParamValue::List(items) => {
      let item_key = format!("{}[]", key);
      for item in items {
        flatten(item_key.clone(), item, out);
      }
    }
    ParamValue::Map(params) => {
      for (child, v) in params.iter() {
        flatten(format!("{}[{}]", key, child), v, out);
      }
    }
    scalar => {
      if let Some(text) = scalar.scalar_text() {
        out.push(key, text);
      }
    }
  }
}

fn encode_component(value: &str) -> String {
  byte_serialize(value.as_bytes()).collect()
}

fn encode_key(key: &str) -> String {
  let mut out = String::with_capacity(key.len());
  let mut segment = String::new();
  for ch in key.chars() {
    if ch == '[' || ch == ']' {
      out.push_str(&encode_component(&segment));
      segment.clear();
      out.push(ch);
    } else {
      segment.push(ch);
    }
  }
  out.push_str(&encode_component(&segment));
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::request::Method;
  use std::num::NonZeroU32;

  #[test]
  fn test_omitted_never_reaches_the_wire() {
    let nested = Params::new()
      .with("keep", "yes")
      .with("drop", ParamValue::Omitted);
    let descriptor = RequestDescriptor::post("/x")
      .param("name", "Quiz")
      .param("skip", ParamValue::Omitted)
      .param("weight", None::<i64>)
      .param(
        "include",
        ParamValue::List(vec!["a".into(), ParamValue::Omitted, "b".into()]),
      )
      .param("nested", nested);

    let wire = encode(&descriptor);
    let query = wire.to_query_string();

    assert!(!query.contains("skip"));
    assert!(!query.contains("weight"));
    assert!(!query.contains("drop"));
    assert!(!query.to_lowercase().contains("omitted"));
    assert_eq!(
      query,
      "name=Quiz&include[]=a&include[]=b&nested[keep]=yes"
    );
  }

  #[test]
  fn test_falsy_values_are_sent() {
    let descriptor = RequestDescriptor::put("/x")
      .param("zero", 0)
      .param("no", false)
      .param("empty", "")
      .param("nothing", ParamValue::Null);

    let wire = encode(&descriptor);
    assert_eq!(wire.to_query_string(), "zero=0&no=false&empty=&nothing=");
  }

  #[test]
  fn test_get_injects_token_and_page_size() {
    let descriptor = RequestDescriptor::get("/x")
      .access_token(Some("tok".into()))
      .items_per_page(NonZeroU32::new(7).unwrap());

    let wire = encode(&descriptor);
    assert_eq!(wire.get("access_token"), Some("tok"));
    assert_eq!(wire.get("per_page"), Some("7"));
    assert_eq!(wire.get("page"), None);
  }

  #[test]
  fn test_existing_token_and_page_size_win() {
    let descriptor = RequestDescriptor::get("/x")
      .param("access_token", "explicit")
      .param("per_page", 3)
      .access_token(Some("tok".into()));

    let wire = encode(&descriptor);
    assert_eq!(wire.pairs().len(), 2);
    assert_eq!(wire.get("access_token"), Some("explicit"));
    assert_eq!(wire.get("per_page"), Some("3"));
  }

  #[test]
  fn test_mutations_get_no_page_size() {
    let descriptor = RequestDescriptor::new(Method::Delete, "/x").access_token(Some("t".into()));
    let wire = encode(&descriptor);
    assert_eq!(wire.get("per_page"), None);
    assert_eq!(wire.get("access_token"), Some("t"));
  }

  #[test]
  fn test_start_page_is_sent() {
    let descriptor = RequestDescriptor::get("/x").start_page(NonZeroU32::new(3).unwrap());
    assert_eq!(encode(&descriptor).get("page"), Some("3"));
  }

  #[test]
  fn test_values_are_url_encoded() {
    let descriptor = RequestDescriptor::post("/x")
      .param("title", "A & B = C")
      .param("quiz", Params::new().with("title", "x/y"));

    assert_eq!(
      encode(&descriptor).to_query_string(),
      "title=A+%26+B+%3D+C&quiz[title]=x%2Fy"
    );
  }

  #[test]
  fn test_list_of_objects_uses_brackets() {
    let entry = Params::new().with("id", 1).with("grade", 9.5);
    let descriptor = RequestDescriptor::post("/x").param("grades", vec![ParamValue::Map(entry)]);

    assert_eq!(
      encode(&descriptor).to_query_string(),
      "grades[][id]=1&grades[][grade]=9.5"
    );
  }

  #[test]
  fn test_canonical_json_ignores_order_and_omitted() {
    let a = Params::new()
      .with("b", 2)
      .with("a", 1)
      .with("gone", ParamValue::Omitted);
    let b = Params::new().with("a", 1).with("b", 2);
    assert_eq!(a.to_canonical_json(), b.to_canonical_json());
  }

  #[test]
  fn test_truthy_helpers() {
    assert!(ParamValue::from("").truthy_or_omitted().is_omitted());
    assert!(!ParamValue::from(5).truthy_or_omitted().is_omitted());
    assert!(truthy_elements_or_omitted(vec!["", ""]).is_omitted());
    assert_eq!(
      truthy_elements_or_omitted(vec!["a", "", "b"]),
      ParamValue::List(vec!["a".into(), "b".into()])
    );
  }

  #[test]
  fn test_dates_use_iso_8601() {
    let date = DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
      .unwrap()
      .with_timezone(&Utc);
    assert_eq!(
      ParamValue::from(date),
      ParamValue::Str("2024-03-01T12:00:00.000Z".into())
    );
  }
}

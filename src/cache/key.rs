use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::params::{ParamValue, Params};
use crate::request::RequestDescriptor;

/// Identifies one cached response: the request path plus a hash of everything that shapes
/// the result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
  path: String,
  params_hash: String,
}

impl CacheKey {
  /// Key for `path` with already-normalized params.
  pub fn new(path: impl Into<String>, params: &Params) -> Self {
    Self::from_shape(path.into(), params.to_canonical_json())
  }

  /// Key for a descriptor.
  ///
  /// The access token never takes part; `per_page` (GET only), `max_pages` and
  /// `start_page` do, because they change what comes back.
  pub fn for_request(descriptor: &RequestDescriptor) -> Self {
    let mut params = descriptor.params.without_omitted();
    params.remove("access_token");
    if descriptor.method.is_get() && !params.has("per_page") {
      params.insert(
        "per_page",
        ParamValue::from(descriptor.items_per_page.get()),
      );
    }

    let shape = json!({
      "params": params.to_canonical_json(),
      "max_pages": descriptor.max_pages.map(|n| n.get()),
      "start_page": descriptor.start_page.get(),
    });
    Self::from_shape(descriptor.full_path(), shape)
  }

  fn from_shape(path: String, shape: Value) -> Self {
    // serde_json without `preserve_order` keeps object keys sorted, so this text is canonical
    let mut hasher = Sha256::new();
    hasher.update(shape.to_string().as_bytes());
    Self {
      path,
      params_hash: hex::encode(hasher.finalize()),
    }
  }

  pub fn path(&self) -> &str {
    &self.path
  }

  pub fn params_hash(&self) -> &str {
    &self.params_hash
  }
}

impl std::fmt::Display for CacheKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}#{}", self.path, &self.params_hash[..12.min(self.params_hash.len())])
  }
}

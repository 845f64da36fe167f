//! Query keys for cached pages.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Ordered list of segments identifying one cache entry.
///
/// Page entries use `[entity_key, org_id, page]`. Keys are compared segment
/// by segment, so `[users, 42]` is a prefix of `[users, 42, 3]` but not of
/// `[users, 420, 3]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
  pub fn new<I, S>(segments: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self(segments.into_iter().map(Into::into).collect())
  }

  /// Key of one cached page.
  pub fn page(entity_key: &str, org_id: &str, page: u32) -> Self {
    Self(vec![
      entity_key.to_string(),
      org_id.to_string(),
      page.to_string(),
    ])
  }

  /// Prefix covering every page of one entity type within one organization.
  pub fn scope(entity_key: &str, org_id: &str) -> Self {
    Self(vec![entity_key.to_string(), org_id.to_string()])
  }

  pub fn segments(&self) -> &[String] {
    &self.0
  }

  pub fn starts_with(&self, prefix: &QueryKey) -> bool {
    self.0.starts_with(&prefix.0)
  }

  /// JSON array form of the key, e.g. `["users","42","3"]`.
  pub fn path(&self) -> String {
    Value::from(self.0.clone()).to_string()
  }

  /// Text every descendant key's path starts with: the path without its
  /// closing bracket, followed by a comma.
  pub(crate) fn child_path_prefix(&self) -> String {
    let path = self.path();
    let open = path.strip_suffix(']').unwrap_or(&path);
    format!("{},", open)
  }

  /// SHA256 of the path, for stable fixed-length storage keys.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.path().as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0.join("/"))
  }
}

use serde::{Deserialize, Serialize};

/// One page of a collection as returned by the backend.
///
/// Wire shape: `{ "data": [...], "totalItems": 250 }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse<T> {
  pub data: Vec<T>,
  /// Size of the whole collection, not of this page
  #[serde(default)]
  pub total_items: u64,
}

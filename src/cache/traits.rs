//! Core traits and types for cached entities.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

/// Trait for records that can be held in a paginated cache.
///
/// Implementors provide a stable id used for dedupe and the timestamps used
/// for recency ordering. Entities are stored as JSON, hence the serde bounds.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Unique identifier within the collection (the backend's `_id`)
  fn id(&self) -> &str;

  /// Last modification timestamp (ISO 8601).
  fn updated_at(&self) -> Option<&str>;

  /// Creation timestamp (ISO 8601), used when `updated_at` is absent.
  fn created_at(&self) -> Option<&str> {
    None
  }

  /// Active flag, for entities that can be switched on and off.
  fn is_active(&self) -> Option<bool> {
    None
  }

  fn set_active(&mut self, _active: bool) {}

  /// Key used for recency ordering: `updated_at`, then `created_at`, then "".
  fn recency_key(&self) -> &str {
    self
      .updated_at()
      .or_else(|| self.created_at())
      .unwrap_or("")
  }
}

/// Schemaless entity for callers without their own model types.
///
/// The well-known fields are lifted out; everything else the backend sends is
/// kept in `fields` and written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
  #[serde(rename = "_id")]
  pub id: String,
  #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<String>,
  #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<String>,
  #[serde(rename = "isActive", default, skip_serializing_if = "Option::is_none")]
  pub is_active: Option<bool>,
  #[serde(flatten)]
  pub fields: Map<String, Value>,
}

impl Record {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      updated_at: None,
      created_at: None,
      is_active: None,
      fields: Map::new(),
    }
  }

  pub fn with_updated_at(mut self, updated_at: impl Into<String>) -> Self {
    self.updated_at = Some(updated_at.into());
    self
  }

  pub fn with_created_at(mut self, created_at: impl Into<String>) -> Self {
    self.created_at = Some(created_at.into());
    self
  }

  pub fn with_active(mut self, active: bool) -> Self {
    self.is_active = Some(active);
    self
  }

  pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.fields.insert(name.into(), value.into());
    self
  }
}

impl Entity for Record {
  fn id(&self) -> &str {
    &self.id
  }

  fn updated_at(&self) -> Option<&str> {
    self.updated_at.as_deref()
  }

  fn created_at(&self) -> Option<&str> {
    self.created_at.as_deref()
  }

  fn is_active(&self) -> Option<bool> {
    self.is_active
  }

  fn set_active(&mut self, active: bool) {
    self.is_active = Some(active);
  }
}

//! Query store trait and in-memory implementations.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use super::key::QueryKey;
use super::traits::Entity;

/// A cached page lookup result.
#[derive(Debug, Clone)]
pub struct CachedPage<T> {
  /// The cached entities in order
  pub entities: Vec<T>,
  /// When the page was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for page store backends.
///
/// A store is shared by every cache of an application session; keys from
/// different entity types and organizations never collide.
pub trait QueryStore: Send + Sync + 'static {
  /// Get the cached entities for a key.
  fn get_page<T: Entity>(&self, key: &QueryKey) -> Result<Option<CachedPage<T>>>;

  /// Store entities under a key, replacing what was there.
  fn set_page<T: Entity>(&self, key: &QueryKey, entities: &[T]) -> Result<()>;

  /// Drop every entry whose key starts with `prefix`. Returns how many were removed.
  fn invalidate(&self, prefix: &QueryKey) -> Result<usize>;

  /// Drop everything (end of session).
  fn clear(&self) -> Result<()>;
}

struct StoredPage {
  data: Value,
  cached_at: DateTime<Utc>,
}

/// In-memory store holding pages as JSON values.
///
/// Entries older than `cache_time` are evicted when read, or in bulk through
/// [`MemoryStore::evict_expired`].
pub struct MemoryStore {
  entries: Mutex<HashMap<QueryKey, StoredPage>>,
  cache_time: Duration,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      cache_time: Duration::minutes(30),
    }
  }

  /// Set how long an entry is kept after it was written.
  pub fn with_cache_time(mut self, cache_time: Duration) -> Self {
    self.cache_time = cache_time;
    self
  }

  fn is_expired(&self, cached_at: DateTime<Utc>) -> bool {
    Utc::now() - cached_at > self.cache_time
  }

  /// Remove all expired entries.
  pub fn evict_expired(&self) -> Result<usize> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let before = entries.len();
    entries.retain(|_, stored| !self.is_expired(stored.cached_at));
    Ok(before - entries.len())
  }

  pub fn len(&self) -> usize {
    self.entries.lock().map(|e| e.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl Default for MemoryStore {
  fn default() -> Self {
    Self::new()
  }
}

impl QueryStore for MemoryStore {
  fn get_page<T: Entity>(&self, key: &QueryKey) -> Result<Option<CachedPage<T>>> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let Some(stored) = entries.get(key) else {
      return Ok(None);
    };

    if self.is_expired(stored.cached_at) {
      entries.remove(key);
      return Ok(None);
    }

    let entities: Vec<T> = serde_json::from_value(stored.data.clone())
      .map_err(|e| eyre!("Failed to deserialize cached page {}: {}", key, e))?;

    Ok(Some(CachedPage {
      entities,
      cached_at: stored.cached_at,
    }))
  }

  fn set_page<T: Entity>(&self, key: &QueryKey, entities: &[T]) -> Result<()> {
    let data = serde_json::to_value(entities)
      .map_err(|e| eyre!("Failed to serialize page {}: {}", key, e))?;

    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.insert(
      key.clone(),
      StoredPage {
        data,
        cached_at: Utc::now(),
      },
    );

    Ok(())
  }

  fn invalidate(&self, prefix: &QueryKey) -> Result<usize> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let before = entries.len();
    entries.retain(|key, _| !key.starts_with(prefix));
    Ok(before - entries.len())
  }

  fn clear(&self) -> Result<()> {
    self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .clear();
    Ok(())
  }
}

/// Store that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStore;

impl QueryStore for NoopStore {
  fn get_page<T: Entity>(&self, _key: &QueryKey) -> Result<Option<CachedPage<T>>> {
    Ok(None) // Always miss
  }

  fn set_page<T: Entity>(&self, _key: &QueryKey, _entities: &[T]) -> Result<()> {
    Ok(()) // Discard
  }

  fn invalidate(&self, _prefix: &QueryKey) -> Result<usize> {
    Ok(0)
  }

  fn clear(&self) -> Result<()> {
    Ok(())
  }
}

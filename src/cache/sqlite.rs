//! SQLite-backed query store, for caches that outlive the process.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::key::QueryKey;
use super::store::{CachedPage, QueryStore};
use super::traits::Entity;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const TIMESTAMP_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// SQLite-based store implementation.
pub struct SqliteStore {
  conn: Mutex<Connection>,
  cache_time: Duration,
}

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the store at the given path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
      cache_time: Duration::minutes(30),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Set how long an entry is kept after it was written.
  pub fn with_cache_time(mut self, cache_time: Duration) -> Self {
    self.cache_time = cache_time;
    self
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("entity-pager").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn is_expired(&self, cached_at: DateTime<Utc>) -> bool {
    Utc::now() - cached_at > self.cache_time
  }

  /// Remove all expired entries.
  pub fn evict_expired(&self) -> Result<usize> {
    let cutoff = (Utc::now() - self.cache_time)
      .format(TIMESTAMP_FORMAT)
      .to_string();
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM page_cache WHERE cached_at < ?", params![cutoff])
      .map_err(|e| eyre!("Failed to evict expired pages: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per cached page (serialized JSON array)
CREATE TABLE IF NOT EXISTS page_cache (
    key_hash TEXT PRIMARY KEY,
    key_path TEXT NOT NULL,
    data BLOB NOT NULL,
    entity_count INTEGER NOT NULL,
    cached_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_page_cache_path ON page_cache(key_path);
"#;

impl QueryStore for SqliteStore {
  fn get_page<T: Entity>(&self, key: &QueryKey) -> Result<Option<CachedPage<T>>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let key_hash = key.cache_hash();

    let row: Option<(Vec<u8>, String)> = conn
      .query_row(
        "SELECT data, cached_at FROM page_cache WHERE key_hash = ?",
        params![key_hash],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cached page {}: {}", key, e))?;

    let Some((data, cached_at_str)) = row else {
      return Ok(None);
    };

    let cached_at = parse_datetime(&cached_at_str)?;
    if self.is_expired(cached_at) {
      conn
        .execute("DELETE FROM page_cache WHERE key_hash = ?", params![key_hash])
        .map_err(|e| eyre!("Failed to evict cached page {}: {}", key, e))?;
      return Ok(None);
    }

    let entities: Vec<T> = serde_json::from_slice(&data)
      .map_err(|e| eyre!("Failed to deserialize cached page {}: {}", key, e))?;

    Ok(Some(CachedPage {
      entities,
      cached_at,
    }))
  }

  fn set_page<T: Entity>(&self, key: &QueryKey, entities: &[T]) -> Result<()> {
    let data = serde_json::to_vec(entities)
      .map_err(|e| eyre!("Failed to serialize page {}: {}", key, e))?;
    let cached_at = Utc::now().format(TIMESTAMP_FORMAT).to_string();

    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO page_cache (key_hash, key_path, data, entity_count, cached_at)
         VALUES (?, ?, ?, ?, ?)",
        params![key.cache_hash(), key.path(), data, entities.len(), cached_at],
      )
      .map_err(|e| eyre!("Failed to store page {}: {}", key, e))?;

    Ok(())
  }

  fn invalidate(&self, prefix: &QueryKey) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let removed = if prefix.segments().is_empty() {
      conn.execute("DELETE FROM page_cache", [])
    } else {
      // Compare path text directly; LIKE would need escaping of `%` and `_`
      conn.execute(
        "DELETE FROM page_cache
         WHERE key_path = ?1 OR substr(key_path, 1, length(?2)) = ?2",
        params![prefix.path(), prefix.child_path_prefix()],
      )
    };

    removed.map_err(|e| eyre!("Failed to invalidate {}: {}", prefix, e))
  }

  fn clear(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM page_cache", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))?;

    Ok(())
  }
}

/// Parse a stored timestamp (UTC, "YYYY-MM-DD HH:MM:SS.ffffff").
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  chrono::NaiveDateTime::parse_from_str(s, TIMESTAMP_PARSE_FORMAT)
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::pager::PagerConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  /// Organization to scope requests to (the CLI's --org overrides it)
  pub org_id: Option<String>,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Entity key -> collection path below `api.base_url`
  #[serde(default)]
  pub entities: BTreeMap<String, String>,
  /// Directory for log files (defaults to the platform data directory)
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub base_url: String,
  /// Per-request timeout; no timeout when unset
  pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Entities per page
  pub limit: u32,
  /// Seconds a stored page is served without refetching
  pub stale_time_secs: u64,
  /// Seconds a stored page is kept at all
  pub cache_time_secs: u64,
  pub gap_fill: bool,
  /// Debounce window for `GapFillScheduler`. Only library users that spawn a
  /// scheduler read it; the command line tool fills gaps once per run.
  pub gap_fill_debounce_ms: u64,
  /// Keep pages in SQLite between runs instead of in memory
  pub persist: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      limit: 100,
      stale_time_secs: 300,
      cache_time_secs: 1800,
      gap_fill: true,
      gap_fill_debounce_ms: 500,
      persist: false,
    }
  }
}

impl CacheConfig {
  /// Pager settings for one entity type.
  pub fn pager_config(&self, entity_key: &str) -> PagerConfig {
    let config = PagerConfig::new(entity_key)
      .with_limit(self.limit)
      .with_stale_time(Duration::seconds(secs_i64(self.stale_time_secs)))
      .with_gap_fill_debounce(std::time::Duration::from_millis(self.gap_fill_debounce_ms));

    if self.gap_fill {
      config
    } else {
      config.without_gap_fill()
    }
  }

  pub fn cache_time(&self) -> Duration {
    Duration::seconds(secs_i64(self.cache_time_secs))
  }
}

fn secs_i64(secs: u64) -> i64 {
  // chrono durations top out well below i64::MAX seconds
  i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1000)
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./entity-pager.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/entity-pager/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/entity-pager/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("entity-pager.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("entity-pager").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  /// Collection path configured for an entity key.
  pub fn entity_path(&self, entity_key: &str) -> Result<&str> {
    self
      .entities
      .get(entity_key)
      .map(String::as_str)
      .ok_or_else(|| {
        let known: Vec<&str> = self.entities.keys().map(String::as_str).collect();
        eyre!(
          "Unknown entity '{}'. Configured entities: {}",
          entity_key,
          known.join(", ")
        )
      })
  }

  /// Get the API token from environment variables, if any.
  ///
  /// Checks ENTITY_PAGER_TOKEN first, then API_TOKEN as fallback.
  pub fn get_api_token() -> Option<String> {
    std::env::var("ENTITY_PAGER_TOKEN")
      .or_else(|_| std::env::var("API_TOKEN"))
      .ok()
      .filter(|token| !token.is_empty())
  }
}

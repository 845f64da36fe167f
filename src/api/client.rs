use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::api::types::PageResponse;
use crate::cache::Entity;
use crate::config::{ApiConfig, Config};

/// Source of collection pages.
///
/// The pager only ever asks for one page at a time; retries and timeouts are
/// the implementor's business.
#[async_trait]
pub trait PageFetcher<T: Entity>: Send + Sync + 'static {
  /// Fetch 1-indexed `page` holding at most `limit` entities.
  async fn fetch_page(&self, page: u32, limit: u32) -> Result<PageResponse<T>>;
}

#[async_trait]
impl<T: Entity, F: PageFetcher<T>> PageFetcher<T> for Arc<F> {
  async fn fetch_page(&self, page: u32, limit: u32) -> Result<PageResponse<T>> {
    (**self).fetch_page(page, limit).await
  }
}

/// Append paging parameters to a collection URL.
///
/// `base_url` may already carry a query string, in which case the parameters
/// are joined with `&` instead of `?`.
pub fn page_url(base_url: &str, page: u32, limit: u32) -> String {
  let separator = if base_url.contains('?') { '&' } else { '?' };
  format!("{}{}page={}&limit={}", base_url, separator, page, limit)
}

/// Resolve an entity path against the API base URL.
///
/// Absolute paths (`https://...`) are used as they are.
pub fn join_url(base_url: &str, path: &str) -> String {
  if path.starts_with("http://") || path.starts_with("https://") {
    return path.to_string();
  }
  if path.is_empty() {
    return base_url.to_string();
  }
  format!(
    "{}/{}",
    base_url.trim_end_matches('/'),
    path.trim_start_matches('/')
  )
}

/// REST page fetcher backed by reqwest.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  base_url: String,
  token: Option<String>,
}

impl HttpFetcher {
  /// Create a fetcher for one entity collection below the configured API.
  pub fn new(config: &ApiConfig, path: &str) -> Result<Self> {
    let base_url = join_url(&config.base_url, path);
    Url::parse(&base_url).map_err(|e| eyre!("Invalid collection URL {}: {}", base_url, e))?;

    let mut builder = reqwest::Client::builder().gzip(true).deflate(true);
    if let Some(secs) = config.request_timeout_secs {
      builder = builder.timeout(Duration::from_secs(secs));
    }
    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self::with_client(client, base_url, Config::get_api_token()))
  }

  /// Create a fetcher from an existing client.
  pub fn with_client(client: reqwest::Client, base_url: String, token: Option<String>) -> Self {
    Self {
      client,
      base_url,
      token,
    }
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }
}

#[async_trait]
impl<T: Entity> PageFetcher<T> for HttpFetcher {
  async fn fetch_page(&self, page: u32, limit: u32) -> Result<PageResponse<T>> {
    let url = page_url(&self.base_url, page, limit);
    debug!("GET {}", url);

    let mut request = self.client.get(&url);
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

    let status = response.status();
    if !status.is_success() {
      return Err(eyre!("Request to {} failed with status {}", url, status));
    }

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response from {}: {}", url, e))?;

    serde_json::from_slice(&body).map_err(|e| eyre!("Failed to parse page from {}: {}", url, e))
  }
}

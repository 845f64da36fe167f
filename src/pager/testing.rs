//! In-memory page source for pager tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::api::{PageFetcher, PageResponse};
use crate::cache::Record;

/// Serves slices of a fixed collection and records every requested page.
pub(crate) struct FakeFetcher {
  collection: Vec<Record>,
  overrides: Mutex<HashMap<u32, Vec<Record>>>,
  failing: Mutex<HashSet<u32>>,
  requests: Mutex<Vec<u32>>,
  delay: Option<Duration>,
}

impl FakeFetcher {
  /// Collection of `size` records, `item-0` being the most recent.
  pub(crate) fn with_items(size: usize) -> Self {
    let collection = (0..size)
      .map(|n| Record::new(format!("item-{}", n)).with_updated_at(timestamp(n)))
      .collect();

    Self {
      collection,
      overrides: Mutex::new(HashMap::new()),
      failing: Mutex::new(HashSet::new()),
      requests: Mutex::new(Vec::new()),
      delay: None,
    }
  }

  pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  /// Serve `records` for `page` instead of the collection slice.
  pub(crate) fn override_page(&self, page: u32, records: Vec<Record>) {
    self.overrides.lock().unwrap().insert(page, records);
  }

  pub(crate) fn fail_page(&self, page: u32) {
    self.failing.lock().unwrap().insert(page);
  }

  pub(crate) fn heal_page(&self, page: u32) {
    self.failing.lock().unwrap().remove(&page);
  }

  /// Pages requested so far, sorted.
  pub(crate) fn requests(&self) -> Vec<u32> {
    let mut requests = self.requests.lock().unwrap().clone();
    requests.sort_unstable();
    requests
  }
}

/// Timestamp that sorts descending as `n` grows.
pub(crate) fn timestamp(n: usize) -> String {
  format!("2024-06-01T00:00:00.{:06}Z", 999_999 - n)
}

#[async_trait]
impl PageFetcher<Record> for FakeFetcher {
  async fn fetch_page(&self, page: u32, limit: u32) -> Result<PageResponse<Record>> {
    self.requests.lock().unwrap().push(page);

    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }

    if self.failing.lock().unwrap().contains(&page) {
      return Err(eyre!("Request for page {} failed with status 503", page));
    }

    let data = match self.overrides.lock().unwrap().get(&page) {
      Some(records) => records.clone(),
      None => {
        let start = ((page as usize) - 1) * limit as usize;
        self
          .collection
          .iter()
          .skip(start)
          .take(limit as usize)
          .cloned()
          .collect()
      }
    };

    Ok(PageResponse {
      data,
      total_items: self.collection.len() as u64,
    })
  }
}

//! Gap detection and debounced gap filling.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::api::PageFetcher;
use crate::cache::{Entity, QueryStore};

use super::cache::PaginatedCache;

/// Runs of pages missing below the highest loaded page, as inclusive ranges.
///
/// `{1, 2, 5, 8}` yields `[(3, 4), (6, 7)]`.
pub fn find_gaps(loaded_pages: &BTreeSet<u32>) -> Vec<(u32, u32)> {
  let mut gaps = Vec::new();
  let mut expected = 1;

  for &page in loaded_pages {
    if page > expected {
      gaps.push((expected, page - 1));
    }
    expected = expected.max(page.saturating_add(1));
  }

  gaps
}

/// Debounced trigger for [`PaginatedCache::fill_gaps`].
///
/// Every [`trigger`](Self::trigger) restarts the debounce window; one pass
/// runs once the window elapses without another trigger. Passes run on a
/// tokio task owned by the scheduler and stop when it is dropped.
pub struct GapFillScheduler {
  tx: mpsc::UnboundedSender<()>,
  passes: Arc<AtomicUsize>,
  handle: JoinHandle<()>,
}

impl GapFillScheduler {
  /// Spawn a scheduler using the cache's configured debounce window.
  pub fn spawn<T, F, S>(cache: PaginatedCache<T, F, S>) -> Self
  where
    T: Entity,
    F: PageFetcher<T>,
    S: QueryStore,
  {
    let debounce = cache.config().gap_fill_debounce;
    Self::with_debounce(cache, debounce)
  }

  pub fn with_debounce<T, F, S>(cache: PaginatedCache<T, F, S>, debounce: Duration) -> Self
  where
    T: Entity,
    F: PageFetcher<T>,
    S: QueryStore,
  {
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    let passes = Arc::new(AtomicUsize::new(0));
    let pass_count = Arc::clone(&passes);

    let handle = tokio::spawn(async move {
      while rx.recv().await.is_some() {
        // Swallow triggers until the window passes quietly
        let mut closed = false;
        loop {
          match tokio::time::timeout(debounce, rx.recv()).await {
            Ok(Some(())) => continue,
            Ok(None) => {
              closed = true;
              break;
            }
            Err(_) => break,
          }
        }

        if let Err(e) = cache.fill_gaps().await {
          warn!("{}: gap fill failed: {}", cache.config().entity_key, e);
        }
        pass_count.fetch_add(1, Ordering::SeqCst);

        if closed {
          break;
        }
      }
    });

    Self { tx, passes, handle }
  }

  /// Request a gap-fill pass.
  pub fn trigger(&self) {
    // Ignore send errors - the task only exits once we're dropped
    let _ = self.tx.send(());
  }

  /// Number of passes run so far.
  pub fn passes(&self) -> usize {
    self.passes.load(Ordering::SeqCst)
  }
}

impl Drop for GapFillScheduler {
  fn drop(&mut self) {
    self.handle.abort();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStore, Record};
  use crate::pager::testing::FakeFetcher;
  use crate::pager::{OrgScope, PagerConfig};

  type TestCache = PaginatedCache<Record, Arc<FakeFetcher>, MemoryStore>;

  fn cache_with(fetcher: &Arc<FakeFetcher>, config: PagerConfig) -> TestCache {
    PaginatedCache::builder(config, Arc::clone(fetcher), Arc::new(MemoryStore::new()))
      .scope(OrgScope::resolved("42"))
      .build()
  }

  fn pages(list: &[u32]) -> BTreeSet<u32> {
    list.iter().copied().collect()
  }

  #[test]
  fn test_no_gaps() {
    assert!(find_gaps(&pages(&[])).is_empty());
    assert!(find_gaps(&pages(&[1, 2, 3])).is_empty());
  }

  #[test]
  fn test_single_and_multiple_gaps() {
    assert_eq!(find_gaps(&pages(&[1, 2, 4])), vec![(3, 3)]);
    assert_eq!(find_gaps(&pages(&[1, 2, 5])), vec![(3, 4)]);
    assert_eq!(find_gaps(&pages(&[1, 2, 5, 8])), vec![(3, 4), (6, 7)]);
  }

  #[test]
  fn test_leading_gap() {
    assert_eq!(find_gaps(&pages(&[3])), vec![(1, 2)]);
    assert_eq!(find_gaps(&pages(&[2, 4])), vec![(1, 1), (3, 3)]);
  }

  #[tokio::test]
  async fn test_scheduler_coalesces_triggers() {
    let fetcher = Arc::new(FakeFetcher::with_items(50));
    let cache = cache_with(&fetcher, PagerConfig::new("users").with_limit(10));
    cache.fetch_entities(1).await.unwrap();
    cache.fetch_entities(4).await.unwrap();

    let scheduler = GapFillScheduler::with_debounce(cache.clone(), Duration::from_millis(50));
    for _ in 0..5 {
      scheduler.trigger();
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(scheduler.passes(), 1);
    assert_eq!(cache.loaded_pages(), vec![1, 2, 3, 4]);
    assert_eq!(fetcher.requests(), vec![1, 2, 3, 4]);
  }

  #[tokio::test]
  async fn test_scheduler_respects_disabled_gap_fill() {
    let fetcher = Arc::new(FakeFetcher::with_items(50));
    let config = PagerConfig::new("users")
      .with_limit(10)
      .without_gap_fill()
      .with_gap_fill_debounce(Duration::from_millis(20));
    let cache = cache_with(&fetcher, config);
    cache.fetch_entities(3).await.unwrap();

    let scheduler = GapFillScheduler::spawn(cache.clone());
    scheduler.trigger();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(scheduler.passes(), 1);
    assert_eq!(cache.loaded_pages(), vec![3]);
    assert_eq!(fetcher.requests(), vec![3]);
  }
}

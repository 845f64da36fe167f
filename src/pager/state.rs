//! Load status and pagination snapshots.

use std::collections::BTreeSet;

/// Status of the most recent tracked load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LoadStatus {
  /// Nothing has been loaded yet
  #[default]
  Idle,
  /// A load is in flight
  Loading,
  /// The last load completed
  Success,
  /// The last load failed
  Error(String),
}

impl LoadStatus {
  pub fn is_loading(&self) -> bool {
    matches!(self, LoadStatus::Loading)
  }

  pub fn is_error(&self) -> bool {
    matches!(self, LoadStatus::Error(_))
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      LoadStatus::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// How much of the collection is held locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
  /// No page loaded yet
  Uninitialized,
  /// Some but not all pages implied by `total_items` are loaded
  PartiallyLoaded,
  /// Every page up to the last one is loaded
  FullyLoaded,
}

/// Point-in-time view of a cache's pagination bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationState {
  pub page_number: u32,
  pub limit: u32,
  pub total_items: u64,
  pub total_pages: u32,
  pub loaded_pages: Vec<u32>,
  pub phase: LoadPhase,
}

impl PaginationState {
  pub(crate) fn new(
    page_number: u32,
    limit: u32,
    total_items: u64,
    loaded_pages: &BTreeSet<u32>,
  ) -> Self {
    let total_pages = total_pages(total_items, limit);
    Self {
      page_number,
      limit,
      total_items,
      total_pages,
      loaded_pages: loaded_pages.iter().copied().collect(),
      phase: phase(loaded_pages, total_pages),
    }
  }
}

/// Number of pages needed for `total_items` at `limit` per page.
pub fn total_pages(total_items: u64, limit: u32) -> u32 {
  if limit == 0 {
    return 0;
  }
  let pages = total_items.div_ceil(u64::from(limit));
  u32::try_from(pages).unwrap_or(u32::MAX)
}

fn phase(loaded_pages: &BTreeSet<u32>, total_pages: u32) -> LoadPhase {
  if loaded_pages.is_empty() {
    LoadPhase::Uninitialized
  } else if (1..=total_pages).all(|page| loaded_pages.contains(&page)) {
    LoadPhase::FullyLoaded
  } else {
    LoadPhase::PartiallyLoaded
  }
}

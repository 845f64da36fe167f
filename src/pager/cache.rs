//! Paginated entity cache.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::api::PageFetcher;
use crate::cache::{sort_by_property, sort_by_recency, Entity, QueryKey, QueryStore, SortOrder};

use super::gaps::find_gaps;
use super::hooks::{AddHook, AfterMutation, HookContext, RemoveHook};
use super::scope::OrgScope;
use super::state::{LoadStatus, PaginationState};

/// Settings for one paginated cache.
#[derive(Debug, Clone)]
pub struct PagerConfig {
  /// Distinguishes entity types in the shared store, e.g. "users"
  pub entity_key: String,
  /// Entities per page
  pub limit: u32,
  /// How long a stored page is served without refetching
  pub stale_time: Duration,
  /// Whether `fill_gaps` fetches missing pages
  pub gap_fill: bool,
  /// Debounce window for scheduled gap-fill passes
  pub gap_fill_debounce: std::time::Duration,
}

impl PagerConfig {
  pub fn new(entity_key: impl Into<String>) -> Self {
    Self {
      entity_key: entity_key.into(),
      limit: 100,
      stale_time: Duration::minutes(5),
      gap_fill: true,
      gap_fill_debounce: std::time::Duration::from_millis(500),
    }
  }

  pub fn with_limit(mut self, limit: u32) -> Self {
    self.limit = limit.max(1);
    self
  }

  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  /// Leave gap filling to the caller.
  pub fn without_gap_fill(mut self) -> Self {
    self.gap_fill = false;
    self
  }

  pub fn with_gap_fill_debounce(mut self, debounce: std::time::Duration) -> Self {
    self.gap_fill_debounce = debounce;
    self
  }
}

struct PagerState {
  scope: OrgScope,
  page_number: u32,
  total_items: u64,
  loaded_pages: BTreeSet<u32>,
  status: LoadStatus,
}

struct Inner<T, F, S> {
  config: PagerConfig,
  fetcher: F,
  store: Arc<S>,
  state: Mutex<PagerState>,
  on_after_add: Option<AddHook<T>>,
  on_after_remove: Option<RemoveHook>,
}

/// Client-side cache accumulating server pages of one entity type.
///
/// Fetched pages are written to the shared [`QueryStore`] under
/// `[entity_key, org_id, page]`. [`PaginatedCache::data`] is the union of
/// the loaded pages, deduplicated by id and ordered most recent first.
/// Local mutations edit the stored pages directly, ahead of any server
/// round-trip.
///
/// The handle is cheap to clone; clones share state.
pub struct PaginatedCache<T, F, S> {
  inner: Arc<Inner<T, F, S>>,
}

impl<T, F, S> Clone for PaginatedCache<T, F, S> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

/// Builder for [`PaginatedCache`].
pub struct PaginatedCacheBuilder<T, F, S> {
  config: PagerConfig,
  fetcher: F,
  store: Arc<S>,
  scope: OrgScope,
  on_after_add: Option<AddHook<T>>,
  on_after_remove: Option<RemoveHook>,
}

impl<T: Entity, F: PageFetcher<T>, S: QueryStore> PaginatedCacheBuilder<T, F, S> {
  pub fn scope(mut self, scope: OrgScope) -> Self {
    self.scope = scope;
    self
  }

  pub fn on_after_add<H>(mut self, hook: H) -> Self
  where
    H: Fn(&HookContext<'_>, &T) -> AfterMutation + Send + Sync + 'static,
  {
    self.on_after_add = Some(Arc::new(hook));
    self
  }

  pub fn on_after_remove<H>(mut self, hook: H) -> Self
  where
    H: Fn(&HookContext<'_>, &str) -> AfterMutation + Send + Sync + 'static,
  {
    self.on_after_remove = Some(Arc::new(hook));
    self
  }

  pub fn build(self) -> PaginatedCache<T, F, S> {
    PaginatedCache {
      inner: Arc::new(Inner {
        config: self.config,
        fetcher: self.fetcher,
        store: self.store,
        state: Mutex::new(PagerState {
          scope: self.scope,
          page_number: 1,
          total_items: 0,
          loaded_pages: BTreeSet::new(),
          status: LoadStatus::Idle,
        }),
        on_after_add: self.on_after_add,
        on_after_remove: self.on_after_remove,
      }),
    }
  }
}

impl<T: Entity, F: PageFetcher<T>, S: QueryStore> PaginatedCache<T, F, S> {
  /// Create a cache with an unresolved scope and no hooks.
  pub fn new(config: PagerConfig, fetcher: F, store: Arc<S>) -> Self {
    Self::builder(config, fetcher, store).build()
  }

  pub fn builder(config: PagerConfig, fetcher: F, store: Arc<S>) -> PaginatedCacheBuilder<T, F, S> {
    PaginatedCacheBuilder {
      config,
      fetcher,
      store,
      scope: OrgScope::Unresolved,
      on_after_add: None,
      on_after_remove: None,
    }
  }

  pub fn config(&self) -> &PagerConfig {
    &self.inner.config
  }

  pub fn store(&self) -> &Arc<S> {
    &self.inner.store
  }

  // ==========================================================================
  // Fetching
  // ==========================================================================

  /// Fetch one page from the backend and store it under its own key.
  ///
  /// Returns the page's entities, or an empty list without any request while
  /// the scope is unresolved.
  pub async fn fetch_entities(&self, page: u32) -> Result<Vec<T>> {
    if page == 0 {
      return Err(eyre!("Page numbers start at 1"));
    }
    let Some(org_id) = self.resolved_org()? else {
      return Ok(Vec::new());
    };

    let response = self
      .inner
      .fetcher
      .fetch_page(page, self.inner.config.limit)
      .await?;

    {
      let mut state = self.lock_state();
      let key = self.page_key(&org_id, page);
      self.inner.store.set_page(&key, &response.data)?;

      // The scope may have changed while the request was in flight
      if state.scope.org_id() == Some(org_id.as_str()) {
        state.total_items = response.total_items;
        state.loaded_pages.insert(page);
      }
    }

    debug!(
      "{}: fetched page {} ({} entities, {} total)",
      self.inner.config.entity_key,
      page,
      response.data.len(),
      response.total_items
    );

    Ok(response.data)
  }

  /// Fetch every page in `start_page..=end_page` that isn't loaded yet.
  ///
  /// Missing pages are requested concurrently. If any request fails the call
  /// fails as a whole and nothing is stored or marked loaded. Otherwise each
  /// page is stored under its own key, the fetched entities are merged into
  /// the current page's slot when that slot is part of the view (a re-fetched
  /// id replaces the copy already there), and the whole range is marked
  /// loaded. Returns the newly fetched entities.
  pub async fn fetch_more_entities(&self, start_page: u32, end_page: u32) -> Result<Vec<T>> {
    if start_page == 0 || start_page > end_page {
      return Err(eyre!("Invalid page range {}..={}", start_page, end_page));
    }
    let Some(org_id) = self.resolved_org()? else {
      return Ok(Vec::new());
    };

    let missing: Vec<u32> = {
      let state = self.lock_state();
      (start_page..=end_page)
        .filter(|page| !state.loaded_pages.contains(page))
        .collect()
    };

    if missing.is_empty() {
      debug!(
        "{}: pages {}..={} already loaded",
        self.inner.config.entity_key, start_page, end_page
      );
      return Ok(Vec::new());
    }

    let limit = self.inner.config.limit;
    let responses = try_join_all(
      missing
        .iter()
        .map(|&page| self.inner.fetcher.fetch_page(page, limit)),
    )
    .await?;

    let total_items = responses.last().map(|r| r.total_items);
    let pages: Vec<(u32, Vec<T>)> = missing
      .iter()
      .copied()
      .zip(responses.into_iter().map(|r| r.data))
      .collect();
    let fetched: Vec<T> = pages.iter().flat_map(|(_, data)| data.iter().cloned()).collect();

    {
      let mut state = self.lock_state();
      let same_scope = state.scope.org_id() == Some(org_id.as_str());
      let slot = state.page_number;
      let slot_loaded = same_scope && state.loaded_pages.contains(&slot);
      let merge_into_slot =
        slot_loaded || (same_scope && (start_page..=end_page).contains(&slot));

      for (page, data) in &pages {
        if !(merge_into_slot && *page == slot) {
          self.inner.store.set_page(&self.page_key(&org_id, *page), data)?;
        }
      }

      if merge_into_slot {
        let key = self.page_key(&org_id, slot);
        // An unloaded slot may still hold a copy from before a scope switch
        let existing = if slot_loaded {
          self
            .inner
            .store
            .get_page::<T>(&key)?
            .map(|cached| cached.entities)
            .unwrap_or_default()
        } else {
          Vec::new()
        };
        self
          .inner
          .store
          .set_page(&key, &merge_entities(existing, &fetched))?;
      }

      if same_scope {
        if let Some(total_items) = total_items {
          state.total_items = total_items;
        }
        state.loaded_pages.extend(start_page..=end_page);
      }
    }

    debug!(
      "{}: fetched pages {:?} ({} entities)",
      self.inner.config.entity_key,
      missing,
      fetched.len()
    );

    Ok(fetched)
  }

  /// Fetch every run of missing pages below the highest loaded page.
  ///
  /// Returns the runs that were filled. Does nothing when gap filling is
  /// disabled for this cache.
  pub async fn fill_gaps(&self) -> Result<Vec<(u32, u32)>> {
    if !self.inner.config.gap_fill {
      return Ok(Vec::new());
    }

    let gaps = {
      let state = self.lock_state();
      find_gaps(&state.loaded_pages)
    };
    if gaps.is_empty() {
      return Ok(gaps);
    }

    info!("{}: filling page gaps {:?}", self.inner.config.entity_key, gaps);
    for &(start, end) in &gaps {
      self.fetch_more_entities(start, end).await?;
    }

    Ok(gaps)
  }

  /// Load the current page, serving the store's copy while it is fresh.
  ///
  /// Progress is reflected in [`is_loading`](Self::is_loading) and
  /// [`is_error`](Self::is_error); errors are also returned.
  pub async fn load_current_page(&self) -> Result<Vec<T>> {
    let page = self.page_number();

    if let Some(org_id) = self.current_org() {
      let key = self.page_key(&org_id, page);
      if let Some(cached) = self.inner.store.get_page::<T>(&key)? {
        if !self.is_stale(cached.cached_at) {
          debug!("{}: serving page {} from cache", self.inner.config.entity_key, page);
          let mut state = self.lock_state();
          state.loaded_pages.insert(page);
          state.status = LoadStatus::Success;
          return Ok(cached.entities);
        }
      }
    }

    self.track(self.fetch_entities(page)).await
  }

  /// Fetch the current page again, ignoring any stored copy.
  pub async fn refetch_current_page(&self) -> Result<Vec<T>> {
    self.track(self.fetch_entities(self.page_number())).await
  }

  async fn track<Fut>(&self, load: Fut) -> Result<Vec<T>>
  where
    Fut: Future<Output = Result<Vec<T>>>,
  {
    self.lock_state().status = LoadStatus::Loading;
    let result = load.await;
    self.lock_state().status = match &result {
      Ok(_) => LoadStatus::Success,
      Err(e) => LoadStatus::Error(e.to_string()),
    };
    result
  }

  fn is_stale(&self, cached_at: DateTime<Utc>) -> bool {
    Utc::now() - cached_at > self.inner.config.stale_time
  }

  // ==========================================================================
  // Local mutations
  // ==========================================================================

  /// Insert an entity at the front of the current page.
  ///
  /// Counts it in `total_items` and marks the current page loaded (page 1 on
  /// a fresh cache), so a first entity shows up without a fetch.
  pub fn add_entity(&self, entity: T) -> AfterMutation {
    let Some(org_id) = self.current_org() else {
      debug!("{}: add ignored, no organization", self.inner.config.entity_key);
      return AfterMutation::Nothing;
    };

    {
      let mut state = self.lock_state();
      state.total_items += 1;
      let slot = state.page_number;
      let key = self.page_key(&org_id, slot);
      if state.loaded_pages.insert(slot) {
        // Whatever is stored under an unloaded slot isn't part of the view
        self.write_slot(&key, std::slice::from_ref(&entity));
      } else {
        self.edit_slot(&key, |entities| {
          entities.insert(0, entity.clone());
          true
        });
      }
    }

    match &self.inner.on_after_add {
      Some(hook) => hook(&self.hook_context(&org_id), &entity),
      None => AfterMutation::Nothing,
    }
  }

  /// Replace every cached copy of the entity with the given one.
  pub fn update_entity(&self, entity: T) {
    let Some(org_id) = self.current_org() else {
      return;
    };

    let state = self.lock_state();
    for &page in &state.loaded_pages {
      self.edit_slot(&self.page_key(&org_id, page), |entities| {
        let mut changed = false;
        for existing in entities.iter_mut().filter(|e| e.id() == entity.id()) {
          *existing = entity.clone();
          changed = true;
        }
        changed
      });
    }
  }

  /// Flip the active flag of every cached copy of an entity.
  pub fn toggle_entity_active(&self, id: &str) {
    let Some(org_id) = self.current_org() else {
      return;
    };

    let state = self.lock_state();
    for &page in &state.loaded_pages {
      self.edit_slot(&self.page_key(&org_id, page), |entities| {
        let mut changed = false;
        for existing in entities.iter_mut().filter(|e| e.id() == id) {
          let active = existing.is_active().unwrap_or(false);
          existing.set_active(!active);
          changed = true;
        }
        changed
      });
    }
  }

  /// Remove an entity from the current page.
  ///
  /// Later pages are not shifted, so the page may stay short of `limit`
  /// until the next refetch.
  pub fn remove_entity(&self, id: &str) -> AfterMutation {
    let Some(org_id) = self.current_org() else {
      debug!("{}: remove ignored, no organization", self.inner.config.entity_key);
      return AfterMutation::Nothing;
    };

    {
      let mut state = self.lock_state();
      state.total_items = state.total_items.saturating_sub(1);
      if state.loaded_pages.contains(&state.page_number) {
        let key = self.page_key(&org_id, state.page_number);
        self.edit_slot(&key, |entities| {
          let before = entities.len();
          entities.retain(|e| e.id() != id);
          entities.len() != before
        });
      }
    }

    match &self.inner.on_after_remove {
      Some(hook) => hook(&self.hook_context(&org_id), id),
      None => AfterMutation::Nothing,
    }
  }

  /// Read-modify-write of one stored page. The edit reports whether it
  /// changed anything; a missing page starts out empty.
  fn edit_slot<E>(&self, key: &QueryKey, edit: E)
  where
    E: FnOnce(&mut Vec<T>) -> bool,
  {
    let mut entities = match self.inner.store.get_page::<T>(key) {
      Ok(cached) => cached.map(|c| c.entities).unwrap_or_default(),
      Err(e) => {
        warn!("Failed to read cached page {}: {}", key, e);
        return;
      }
    };

    if edit(&mut entities) {
      self.write_slot(key, &entities);
    }
  }

  fn write_slot(&self, key: &QueryKey, entities: &[T]) {
    if let Err(e) = self.inner.store.set_page(key, entities) {
      warn!("Failed to write cached page {}: {}", key, e);
    }
  }

  // ==========================================================================
  // Views
  // ==========================================================================

  /// Every entity on a loaded page, each id once, most recent first.
  ///
  /// Pages are visited in ascending order and the first copy of an id wins.
  pub fn data(&self) -> Vec<T> {
    let Some(org_id) = self.current_org() else {
      return Vec::new();
    };
    let pages = self.lock_state().loaded_pages.clone();

    let mut seen = HashSet::new();
    let mut view = Vec::new();
    for page in pages {
      let key = self.page_key(&org_id, page);
      match self.inner.store.get_page::<T>(&key) {
        Ok(Some(cached)) => {
          for entity in cached.entities {
            if seen.insert(entity.id().to_string()) {
              view.push(entity);
            }
          }
        }
        Ok(None) => {}
        Err(e) => warn!("Failed to read cached page {}: {}", key, e),
      }
    }

    sort_by_recency(&mut view);
    view
  }

  /// The accumulated view sorted by a named field. The cache is not modified.
  pub fn sort_entities(&self, property: &str, order: SortOrder) -> Vec<T> {
    sort_by_property(&self.data(), property, order)
  }

  // ==========================================================================
  // State
  // ==========================================================================

  pub fn is_loading(&self) -> bool {
    self.lock_state().status.is_loading()
  }

  pub fn is_error(&self) -> bool {
    self.lock_state().status.is_error()
  }

  pub fn error(&self) -> Option<String> {
    self.lock_state().status.error().map(String::from)
  }

  pub fn status(&self) -> LoadStatus {
    self.lock_state().status.clone()
  }

  pub fn page_number(&self) -> u32 {
    self.lock_state().page_number
  }

  /// Select the current page. Page numbers start at 1; 0 is treated as 1.
  pub fn set_page_number(&self, page: u32) {
    self.lock_state().page_number = page.max(1);
  }

  /// The server's last reported collection size, adjusted by local adds and
  /// removes.
  pub fn total_items(&self) -> u64 {
    self.lock_state().total_items
  }

  pub fn loaded_pages(&self) -> Vec<u32> {
    self.lock_state().loaded_pages.iter().copied().collect()
  }

  pub fn state(&self) -> PaginationState {
    let state = self.lock_state();
    PaginationState::new(
      state.page_number,
      self.inner.config.limit,
      state.total_items,
      &state.loaded_pages,
    )
  }

  pub fn scope(&self) -> OrgScope {
    self.lock_state().scope.clone()
  }

  /// Switch to another tenant. Pagination bookkeeping belongs to the old
  /// scope and is reset; stored pages stay in the store under their keys.
  pub fn set_scope(&self, scope: OrgScope) {
    let mut state = self.lock_state();
    if state.scope == scope {
      return;
    }
    state.scope = scope;
    state.total_items = 0;
    state.loaded_pages.clear();
    state.status = LoadStatus::Idle;
  }

  // ==========================================================================
  // Helpers
  // ==========================================================================

  fn lock_state(&self) -> MutexGuard<'_, PagerState> {
    // State stays consistent across a panic in another holder, keep going
    self
      .inner
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn page_key(&self, org_id: &str, page: u32) -> QueryKey {
    QueryKey::page(&self.inner.config.entity_key, org_id, page)
  }

  fn current_org(&self) -> Option<String> {
    self.lock_state().scope.org_id().map(String::from)
  }

  /// Org id for a fetch: `None` while unresolved, an error once resolution failed.
  fn resolved_org(&self) -> Result<Option<String>> {
    match &self.lock_state().scope {
      OrgScope::Resolved(org_id) => Ok(Some(org_id.clone())),
      OrgScope::Unresolved => {
        debug!(
          "{}: fetch skipped, organization not resolved yet",
          self.inner.config.entity_key
        );
        Ok(None)
      }
      OrgScope::Failed(reason) => Err(eyre!(
        "{}: organization could not be resolved: {}",
        self.inner.config.entity_key,
        reason
      )),
    }
  }

  fn hook_context<'a>(&'a self, org_id: &'a str) -> HookContext<'a> {
    HookContext {
      entity_key: &self.inner.config.entity_key,
      org_id,
    }
  }
}

/// Merge freshly fetched entities into an existing page.
///
/// A fetched entity replaces an existing one with the same id in place; among
/// the fetched entities the last one processed wins. The result is ordered
/// most recent first.
fn merge_entities<T: Entity>(existing: Vec<T>, fetched: &[T]) -> Vec<T> {
  let mut positions: HashMap<String, usize> = HashMap::new();
  let mut merged: Vec<T> = Vec::with_capacity(existing.len() + fetched.len());

  for entity in existing.into_iter().chain(fetched.iter().cloned()) {
    match positions.get(entity.id()) {
      Some(&index) => merged[index] = entity,
      None => {
        positions.insert(entity.id().to_string(), merged.len());
        merged.push(entity);
      }
    }
  }

  sort_by_recency(&mut merged);
  merged
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStore, Record};
  use crate::pager::state::LoadPhase;
  use crate::pager::testing::{timestamp, FakeFetcher};

  type TestCache = PaginatedCache<Record, Arc<FakeFetcher>, MemoryStore>;

  fn config() -> PagerConfig {
    PagerConfig::new("users").with_limit(10)
  }

  fn cache_with(fetcher: &Arc<FakeFetcher>, config: PagerConfig) -> TestCache {
    PaginatedCache::builder(config, Arc::clone(fetcher), Arc::new(MemoryStore::new()))
      .scope(OrgScope::resolved("42"))
      .build()
  }

  fn ids(entities: &[Record]) -> Vec<String> {
    entities.iter().map(|e| e.id.clone()).collect()
  }

  fn assert_unique(entities: &[Record]) {
    let unique: HashSet<_> = entities.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(unique.len(), entities.len(), "duplicate ids in {:?}", ids(entities));
  }

  #[tokio::test]
  async fn test_fetch_entities_is_idempotent_for_loaded_pages() {
    let fetcher = Arc::new(FakeFetcher::with_items(50));
    let cache = cache_with(&fetcher, config());

    let first = cache.fetch_entities(1).await.unwrap();
    cache.fetch_entities(1).await.unwrap();

    assert_eq!(first.len(), 10);
    assert_eq!(cache.loaded_pages(), vec![1]);
    assert_eq!(fetcher.requests(), vec![1, 1]);
    assert_eq!(cache.data().len(), 10);
  }

  #[tokio::test]
  async fn test_total_items_comes_from_server() {
    let fetcher = Arc::new(FakeFetcher::with_items(250));
    let cache = cache_with(&fetcher, PagerConfig::new("users").with_limit(100));

    cache.fetch_entities(1).await.unwrap();

    assert_eq!(cache.total_items(), 250);
    assert_eq!(cache.data().len(), 100);
    let state = cache.state();
    assert_eq!(state.total_pages, 3);
    assert_eq!(state.phase, LoadPhase::PartiallyLoaded);
  }

  #[tokio::test]
  async fn test_page_zero_is_rejected() {
    let fetcher = Arc::new(FakeFetcher::with_items(50));
    let cache = cache_with(&fetcher, config());

    assert!(cache.fetch_entities(0).await.is_err());
    assert!(cache.fetch_more_entities(0, 2).await.is_err());
    assert!(cache.fetch_more_entities(3, 2).await.is_err());
    assert!(fetcher.requests().is_empty());
  }

  #[tokio::test]
  async fn test_unresolved_scope_fetches_nothing() {
    let fetcher = Arc::new(FakeFetcher::with_items(50));
    let cache: TestCache =
      PaginatedCache::new(config(), Arc::clone(&fetcher), Arc::new(MemoryStore::new()));

    assert!(cache.fetch_entities(1).await.unwrap().is_empty());
    assert!(cache.fetch_more_entities(1, 3).await.unwrap().is_empty());
    assert!(fetcher.requests().is_empty());
    assert!(cache.loaded_pages().is_empty());
    assert_eq!(cache.add_entity(Record::new("x")), AfterMutation::Nothing);
    assert_eq!(cache.total_items(), 0);
  }

  #[tokio::test]
  async fn test_failed_scope_is_an_error() {
    let fetcher = Arc::new(FakeFetcher::with_items(50));
    let cache = cache_with(&fetcher, config());
    cache.set_scope(OrgScope::Failed("membership lookup failed".to_string()));

    let err = cache.fetch_entities(1).await.unwrap_err();

    assert!(err.to_string().contains("membership lookup failed"));
    assert!(fetcher.requests().is_empty());
  }

  #[tokio::test]
  async fn test_fetch_more_skips_loaded_pages() {
    let fetcher = Arc::new(FakeFetcher::with_items(50));
    let cache = cache_with(&fetcher, config());

    let first = cache.fetch_more_entities(1, 3).await.unwrap();
    let second = cache.fetch_more_entities(2, 4).await.unwrap();

    assert_eq!(first.len(), 30);
    assert_eq!(second.len(), 10);
    assert_eq!(fetcher.requests(), vec![1, 2, 3, 4]);
    assert_eq!(cache.loaded_pages(), vec![1, 2, 3, 4]);

    let data = cache.data();
    assert_eq!(data.len(), 40);
    assert_unique(&data);
    assert_eq!(data[0].id, "item-0");
    assert_eq!(data[39].id, "item-39");
  }

  #[tokio::test]
  async fn test_fetch_more_is_all_or_nothing() {
    let fetcher = Arc::new(FakeFetcher::with_items(50));
    let cache = cache_with(&fetcher, config());
    fetcher.fail_page(3);

    let result = cache.fetch_more_entities(1, 4).await;

    assert!(result.is_err());
    assert!(cache.loaded_pages().is_empty());
    assert!(cache.data().is_empty());

    fetcher.heal_page(3);
    cache.fetch_more_entities(1, 4).await.unwrap();
    assert_eq!(cache.loaded_pages(), vec![1, 2, 3, 4]);
    assert_eq!(cache.data().len(), 40);
  }

  #[tokio::test]
  async fn test_view_has_each_id_once() {
    let fetcher = Arc::new(FakeFetcher::with_items(50));
    let cache = cache_with(&fetcher, config());

    // item-0 was edited on the server and moved to page 2 between requests
    let mut page_two: Vec<Record> = (10..19)
      .map(|n| Record::new(format!("item-{}", n)).with_updated_at(timestamp(n)))
      .collect();
    page_two.push(Record::new("item-0").with_updated_at("2025-01-01T00:00:00Z"));
    fetcher.override_page(2, page_two);

    cache.fetch_entities(1).await.unwrap();
    cache.fetch_entities(2).await.unwrap();
    cache.fetch_more_entities(1, 3).await.unwrap();

    let data = cache.data();
    assert_unique(&data);
    assert_eq!(data.len(), 29);
  }

  #[tokio::test]
  async fn test_fetch_more_prefers_fetched_copy() {
    let fetcher = Arc::new(FakeFetcher::with_items(50));
    let cache = cache_with(&fetcher, config());
    cache.fetch_entities(1).await.unwrap();
    cache.set_page_number(1);

    fetcher.override_page(
      2,
      vec![Record::new("item-3")
        .with_updated_at("2025-01-01T00:00:00Z")
        .with_field("name", "renamed")],
    );
    // Page 1 is loaded, so only page 2 is requested and merged into slot 1
    cache.fetch_more_entities(1, 2).await.unwrap();

    let data = cache.data();
    assert_unique(&data);
    assert_eq!(data[0].id, "item-3");
    assert_eq!(data[0].fields.get("name"), Some(&serde_json::Value::from("renamed")));
  }

  #[tokio::test]
  async fn test_refetching_current_page_keeps_merged_range() {
    let fetcher = Arc::new(FakeFetcher::with_items(50));
    let cache = cache_with(&fetcher, config());
    cache.load_current_page().await.unwrap();
    cache.fetch_more_entities(2, 3).await.unwrap();
    assert_eq!(cache.data().len(), 30);

    let _ = cache.add_entity(Record::new("draft").with_updated_at("2025-03-01T00:00:00Z"));
    assert_eq!(cache.data().len(), 31);

    // The server doesn't know the draft; pages 2 and 3 must survive the refetch
    cache.refetch_current_page().await.unwrap();

    assert_eq!(cache.loaded_pages(), vec![1, 2, 3]);
    let data = cache.data();
    assert_eq!(data.len(), 30);
    assert_unique(&data);
    assert_eq!(data[29].id, "item-29");
    assert!(cache.fill_gaps().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_fetch_more_outside_current_page_stays_unloaded() {
    let fetcher = Arc::new(FakeFetcher::with_items(50));
    let cache = cache_with(&fetcher, config());

    cache.fetch_more_entities(2, 3).await.unwrap();

    assert_eq!(cache.loaded_pages(), vec![2, 3]);
    assert_eq!(cache.data().len(), 20);

    // Page 1 was never fetched, so it is still a gap
    assert_eq!(cache.fill_gaps().await.unwrap(), vec![(1, 1)]);
    assert_eq!(cache.data().len(), 30);
  }

  #[tokio::test]
  async fn test_fill_gaps_loads_missing_pages() {
    let fetcher = Arc::new(FakeFetcher::with_items(50));
    let cache = cache_with(&fetcher, config());
    for page in [1, 2, 5] {
      cache.fetch_entities(page).await.unwrap();
    }

    let filled = cache.fill_gaps().await.unwrap();

    assert_eq!(filled, vec![(3, 4)]);
    assert_eq!(cache.loaded_pages(), vec![1, 2, 3, 4, 5]);
    assert_eq!(fetcher.requests(), vec![1, 2, 3, 4, 5]);
    assert_eq!(cache.data().len(), 50);
    assert_eq!(cache.state().phase, LoadPhase::FullyLoaded);

    // Nothing left to fill
    assert!(cache.fill_gaps().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_fill_gaps_respects_disable_flag() {
    let fetcher = Arc::new(FakeFetcher::with_items(50));
    let cache = cache_with(&fetcher, config().without_gap_fill());
    cache.fetch_entities(1).await.unwrap();
    cache.fetch_entities(4).await.unwrap();

    assert!(cache.fill_gaps().await.unwrap().is_empty());
    assert_eq!(cache.loaded_pages(), vec![1, 4]);
  }

  #[tokio::test]
  async fn test_add_then_remove_restores_total() {
    let fetcher = Arc::new(FakeFetcher::with_items(50));
    let cache = cache_with(&fetcher, config());
    cache.fetch_entities(1).await.unwrap();

    let created = Record::new("fresh").with_updated_at("2025-03-01T00:00:00Z");
    assert_eq!(cache.add_entity(created), AfterMutation::Nothing);

    assert_eq!(cache.total_items(), 51);
    let data = cache.data();
    assert_eq!(data.len(), 11);
    assert_eq!(data[0].id, "fresh");

    assert_eq!(cache.remove_entity("fresh"), AfterMutation::Nothing);

    assert_eq!(cache.total_items(), 50);
    let data = cache.data();
    assert_eq!(data.len(), 10);
    assert!(data.iter().all(|e| e.id != "fresh"));
  }

  #[tokio::test]
  async fn test_add_to_empty_cache_seeds_first_page() {
    let fetcher = Arc::new(FakeFetcher::with_items(0));
    let cache = cache_with(&fetcher, config());

    let _ = cache.add_entity(Record::new("first"));

    assert_eq!(cache.loaded_pages(), vec![1]);
    assert_eq!(cache.total_items(), 1);
    assert_eq!(ids(&cache.data()), vec!["first"]);
    assert!(fetcher.requests().is_empty());
  }

  #[tokio::test]
  async fn test_remove_floors_total_at_zero() {
    let fetcher = Arc::new(FakeFetcher::with_items(0));
    let cache = cache_with(&fetcher, config());

    let _ = cache.remove_entity("missing");

    assert_eq!(cache.total_items(), 0);
  }

  #[tokio::test]
  async fn test_update_replaces_on_every_loaded_page() {
    let fetcher = Arc::new(FakeFetcher::with_items(50));
    let cache = cache_with(&fetcher, config());
    cache.fetch_entities(1).await.unwrap();
    cache.fetch_entities(2).await.unwrap();

    let updated = Record::new("item-15")
      .with_updated_at(timestamp(15))
      .with_field("role", "admin");
    cache.update_entity(updated.clone());
    cache.update_entity(Record::new("not-cached"));

    let data = cache.data();
    assert_eq!(data.len(), 20);
    let found = data.iter().find(|e| e.id == "item-15").unwrap();
    assert_eq!(found, &updated);
  }

  #[tokio::test]
  async fn test_toggle_entity_active() {
    let fetcher = Arc::new(FakeFetcher::with_items(50));
    let cache = cache_with(&fetcher, config());
    cache.fetch_entities(1).await.unwrap();

    cache.toggle_entity_active("item-2");
    let active = |cache: &TestCache| {
      cache
        .data()
        .into_iter()
        .find(|e| e.id == "item-2")
        .and_then(|e| e.is_active)
    };
    assert_eq!(active(&cache), Some(true));

    cache.toggle_entity_active("item-2");
    assert_eq!(active(&cache), Some(false));

    // Unknown ids are ignored
    cache.toggle_entity_active("nope");
    assert_eq!(cache.data().len(), 10);
  }

  #[tokio::test]
  async fn test_mutation_hooks_can_invalidate_and_request_refetch() {
    let fetcher = Arc::new(FakeFetcher::with_items(50));
    let store = Arc::new(MemoryStore::new());
    let summary_key = QueryKey::new(["dashboardSummary", "42"]);
    store
      .set_page(&summary_key, &[Record::new("summary")])
      .unwrap();

    let hook_store = Arc::clone(&store);
    let cache: TestCache = PaginatedCache::builder(
      PagerConfig::new("allCourses").with_limit(10),
      Arc::clone(&fetcher),
      Arc::clone(&store),
    )
    .scope(OrgScope::resolved("42"))
    .on_after_add(move |ctx, _course: &Record| {
      let _ = hook_store.invalidate(&QueryKey::new(["dashboardSummary", ctx.org_id]));
      AfterMutation::RefetchCurrentPage
    })
    .on_after_remove(|ctx, _id| {
      assert_eq!(ctx.entity_key, "allCourses");
      AfterMutation::Nothing
    })
    .build();

    let next = cache.add_entity(Record::new("course-new"));
    assert_eq!(next, AfterMutation::RefetchCurrentPage);
    assert!(store.get_page::<Record>(&summary_key).unwrap().is_none());

    cache.refetch_current_page().await.unwrap();
    assert_eq!(fetcher.requests(), vec![1]);
    assert_eq!(cache.remove_entity("item-0"), AfterMutation::Nothing);
  }

  #[tokio::test]
  async fn test_sort_entities_with_missing_field() {
    let fetcher = Arc::new(FakeFetcher::with_items(5));
    let cache = cache_with(&fetcher, config());
    cache.fetch_entities(1).await.unwrap();

    let sorted = cache.sort_entities("missingField", SortOrder::Asc);
    assert_eq!(sorted.len(), 5);

    let by_id = cache.sort_entities("_id", SortOrder::Asc);
    assert_eq!(by_id[0].id, "item-0");
    assert_eq!(by_id[4].id, "item-4");
  }

  #[tokio::test]
  async fn test_load_current_page_serves_fresh_store_copy() {
    let store = Arc::new(MemoryStore::new());
    let first_fetcher = Arc::new(FakeFetcher::with_items(50));
    let first: TestCache =
      PaginatedCache::builder(config(), Arc::clone(&first_fetcher), Arc::clone(&store))
        .scope(OrgScope::resolved("42"))
        .build();
    first.load_current_page().await.unwrap();

    let second_fetcher = Arc::new(FakeFetcher::with_items(50));
    let second: TestCache =
      PaginatedCache::builder(config(), Arc::clone(&second_fetcher), Arc::clone(&store))
        .scope(OrgScope::resolved("42"))
        .build();
    let page = second.load_current_page().await.unwrap();

    assert_eq!(page.len(), 10);
    assert!(second_fetcher.requests().is_empty());
    assert_eq!(second.loaded_pages(), vec![1]);
    assert_eq!(second.status(), LoadStatus::Success);
  }

  #[tokio::test]
  async fn test_load_current_page_refetches_stale_copy() {
    let fetcher = Arc::new(FakeFetcher::with_items(50));
    let cache = cache_with(
      &fetcher,
      config().with_stale_time(Duration::milliseconds(-1)),
    );

    cache.load_current_page().await.unwrap();
    cache.load_current_page().await.unwrap();

    assert_eq!(fetcher.requests(), vec![1, 1]);
  }

  #[tokio::test]
  async fn test_load_errors_are_reported() {
    let fetcher = Arc::new(FakeFetcher::with_items(50));
    let cache = cache_with(&fetcher, config());
    fetcher.fail_page(1);

    assert!(cache.load_current_page().await.is_err());
    assert!(cache.is_error());
    assert!(!cache.is_loading());
    assert!(cache.error().unwrap().contains("503"));

    fetcher.heal_page(1);
    cache.refetch_current_page().await.unwrap();
    assert!(!cache.is_error());
  }

  #[tokio::test]
  async fn test_set_scope_resets_bookkeeping() {
    let fetcher = Arc::new(FakeFetcher::with_items(50));
    let cache = cache_with(&fetcher, config());
    cache.fetch_entities(1).await.unwrap();

    cache.set_scope(OrgScope::resolved("7"));

    assert!(cache.loaded_pages().is_empty());
    assert_eq!(cache.total_items(), 0);
    assert!(cache.data().is_empty());

    // Same scope again keeps state
    cache.fetch_entities(1).await.unwrap();
    cache.set_scope(OrgScope::resolved("7"));
    assert_eq!(cache.loaded_pages(), vec![1]);
  }

  #[tokio::test]
  async fn test_view_ignores_slots_from_before_scope_switch() {
    let fetcher = Arc::new(FakeFetcher::with_items(50));
    let cache = cache_with(&fetcher, config());
    cache.fetch_entities(1).await.unwrap();

    cache.set_scope(OrgScope::resolved("7"));
    cache.set_scope(OrgScope::resolved("42"));

    assert!(cache.loaded_pages().is_empty());
    assert!(cache.data().is_empty());

    cache.toggle_entity_active("item-0");
    cache.update_entity(Record::new("item-1").with_field("role", "admin"));
    assert!(cache.data().is_empty());

    // A local insert starts the current page afresh
    let _ = cache.add_entity(Record::new("fresh"));
    assert_eq!(cache.loaded_pages(), vec![1]);
    assert_eq!(ids(&cache.data()), vec!["fresh"]);
  }

  #[tokio::test]
  async fn test_concurrent_overlapping_ranges_stay_deduplicated() {
    let fetcher =
      Arc::new(FakeFetcher::with_items(50).with_delay(std::time::Duration::from_millis(10)));
    let cache = cache_with(&fetcher, config());

    let (a, b) = tokio::join!(
      cache.fetch_more_entities(1, 3),
      cache.fetch_more_entities(2, 4)
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(cache.loaded_pages(), vec![1, 2, 3, 4]);
    let data = cache.data();
    assert_unique(&data);
    assert_eq!(data.len(), 40);
  }
}

//! Paginated entity cache.
//!
//! [`PaginatedCache`] fetches pages of one entity type from a
//! [`PageFetcher`](crate::api::PageFetcher), keeps them in a shared
//! [`QueryStore`](crate::cache::QueryStore) and exposes:
//! - an accumulated, deduplicated, recency-ordered view of all loaded pages
//! - gap detection and filling, optionally debounced by [`GapFillScheduler`]
//! - optimistic local mutations with caller-supplied follow-up hooks

mod cache;
mod gaps;
mod hooks;
mod scope;
mod state;

#[cfg(test)]
mod testing;

pub use cache::{PagerConfig, PaginatedCache, PaginatedCacheBuilder};
pub use gaps::{find_gaps, GapFillScheduler};
pub use hooks::{AddHook, AfterMutation, HookContext, RemoveHook};
pub use scope::OrgScope;
pub use state::{total_pages, LoadPhase, LoadStatus, PaginationState};

//! Client-side cache for paged REST collections.
//!
//! A [`PaginatedCache`] fetches pages of one entity type through a
//! [`PageFetcher`], keeps them in a shared [`QueryStore`], and serves the
//! accumulated, deduplicated, most-recent-first view of everything loaded.
//! Pages missing below the highest loaded page can be filled explicitly or
//! through a debounced [`GapFillScheduler`], and local mutations update the
//! stored pages ahead of the server.

pub mod api;
pub mod cache;
pub mod config;
pub mod pager;

pub use api::{HttpFetcher, PageFetcher, PageResponse};
pub use cache::{Entity, MemoryStore, QueryKey, QueryStore, Record, SortOrder, SqliteStore};
pub use pager::{AfterMutation, GapFillScheduler, OrgScope, PagerConfig, PaginatedCache};

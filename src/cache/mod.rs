//! Page store and entity primitives.
//!
//! This module is transport-agnostic. It provides:
//! - the [`Entity`] trait for records with an id and recency timestamps
//! - [`QueryKey`], segment keys such as `[entity_key, org_id, page]`
//! - the [`QueryStore`] trait with in-memory and SQLite backends
//! - ordering helpers shared by the pager

mod key;
mod sort;
mod sqlite;
mod store;
mod traits;

pub use key::QueryKey;
pub use sort::{sort_by_property, sort_by_recency, SortOrder};
pub use sqlite::SqliteStore;
pub use store::{CachedPage, MemoryStore, NoopStore, QueryStore};
pub use traits::{Entity, Record};

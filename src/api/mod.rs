//! REST transport for paged collections.

mod client;
mod types;

pub use client::{join_url, page_url, HttpFetcher, PageFetcher};
pub use types::PageResponse;

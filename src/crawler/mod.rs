//! Embedded HTTP downloader
//!
//! This module lets a single process crawl on top of a
//! [`FrontierManager`](crate::frontier::FrontierManager):
//! - HTTP fetching with failure classification
//! - HTML link extraction
//! - Timer-driven scheduling with per-slot concurrency limits

mod coordinator;
mod fetcher;
mod parser;

pub use coordinator::{run_crawl, Coordinator, CrawlStats};
pub use fetcher::{build_http_client, classify_error, fetch, FetchOutcome};
pub use parser::{extract_links, links_to_requests};

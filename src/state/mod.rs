//! State module for tracking URL life-cycles
//!
//! Every URL record moves through `NOT_CRAWLED -> QUEUED -> {CRAWLED | ERROR}`.
//! The transition rules live here so that the storage layer, the strategy
//! worker and the codec agree on what a legal update is.

mod url_state;

pub use url_state::UrlState;

//! Storage traits and error types
//!
//! This module defines the interfaces a frontier store must provide and the
//! errors they can raise.

use crate::model::{Request, Response};
use crate::state::UrlState;
use crate::url::DownloaderInfo;
use std::collections::HashMap;
use std::future::Future;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Bus(#[from] crate::bus::BusError),

    #[error(transparent)]
    Codec(#[from] crate::codec::CodecError),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Anything that can hand out the next batch of requests
///
/// The overused buffer wraps one of these, so a backend, a bus-backed remote
/// frontier or a test double can all sit behind it.
pub trait RequestSource: Send {
    /// Returns at most `max_n` requests; `max_n == 0` means no limit
    fn get_next_requests(
        &mut self,
        max_n: usize,
        info: &DownloaderInfo,
    ) -> impl Future<Output = StorageResult<Vec<Request>>> + Send;
}

/// A persistent frontier
///
/// Creation of a record whose fingerprint already exists is never an error:
/// the existing record is left as it is.
pub trait Backend: RequestSource {
    fn start(&mut self) -> impl Future<Output = StorageResult<()>> + Send;

    /// Releases held resources; called once, after the last operation
    fn stop(&mut self) -> impl Future<Output = StorageResult<()>> + Send;

    /// Creates NOT_CRAWLED records at depth 0 for unseen seeds
    fn add_seeds(&mut self, seeds: &[Request]) -> impl Future<Output = StorageResult<()>> + Send;

    /// Marks the page CRAWLED and creates records for unseen links one level
    /// deeper
    fn page_crawled(
        &mut self,
        response: &Response,
        links: &[Request],
    ) -> impl Future<Output = StorageResult<()>> + Send;

    /// Creates records for unseen links one level below `request`
    fn links_extracted(
        &mut self,
        request: &Request,
        links: &[Request],
    ) -> impl Future<Output = StorageResult<()>> + Send;

    /// Marks the request's record ERROR with the given error code
    fn request_error(
        &mut self,
        request: &Request,
        error: &str,
    ) -> impl Future<Output = StorageResult<()>> + Send;

    /// True once the backend will never produce another request
    fn finished(&self) -> bool {
        false
    }
}

/// A URL's state as a strategy left it
#[derive(Debug, Clone, PartialEq)]
pub struct StateEntry {
    pub url: String,
    pub state: UrlState,
}

/// Bulk access to URL states and scores
///
/// Used by the strategy worker to refresh states before deciding and by the
/// storage worker to apply score updates.
pub trait StateStore: Send {
    /// Current states of the given fingerprints; unknown fingerprints are
    /// absent from the result
    fn fetch_states(&mut self, fingerprints: &[String]) -> StorageResult<HashMap<String, UrlState>>;

    /// Writes states back, keyed by fingerprint
    ///
    /// Unknown fingerprints get a depth-0 record in the given state. A known
    /// record is never moved backwards.
    fn flush_states(&mut self, states: &HashMap<String, StateEntry>) -> StorageResult<()>;

    /// Records a strategy's score for a URL; `schedule` makes it fetchable
    /// when the store only serves scheduled records
    fn apply_score(
        &mut self,
        fingerprint: &str,
        url: &str,
        score: Option<f64>,
        schedule: bool,
    ) -> StorageResult<()>;
}

//! Storage module for persisting the frontier
//!
//! This module handles all database operations for the frontier, including:
//! - SQLite database initialization and schema management
//! - URL record creation with duplicate suppression
//! - Policy-ordered selection of the next batch with atomic QUEUED transition
//! - Monotonic state updates and score bookkeeping

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteBackend;
pub use traits::{Backend, RequestSource, StateEntry, StateStore, StorageError, StorageResult};

use crate::config::Config;
use crate::state::UrlState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opens the configured SQLite store
///
/// # Arguments
///
/// * `config` - Loaded configuration
///
/// # Returns
///
/// * `Ok(SqliteBackend)` - Successfully opened store
/// * `Err(StorageError)` - Failed to open the database file
pub fn open_backend(config: &Config) -> StorageResult<SqliteBackend> {
    Ok(SqliteBackend::new(&config.storage.database_path)?
        .with_policy(config.frontier.policy)
        .with_clear_content(config.storage.clear_content)
        .with_require_scheduling(config.storage.require_scheduling))
}

/// Order in which NOT_CRAWLED records are handed out
///
/// Ties are always broken by creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderingPolicy {
    /// Oldest first
    #[default]
    Fifo,
    /// Newest first
    Lifo,
    /// Shallowest first
    Bfs,
    /// Deepest first
    Dfs,
    /// Fresh random permutation on every call
    Random,
    /// Highest score first, unscored records last
    Score,
}

impl OrderingPolicy {
    /// SQL `ORDER BY` clause implementing the policy
    pub fn order_by(&self) -> &'static str {
        match self {
            Self::Fifo => "seq ASC",
            Self::Lifo => "seq DESC",
            Self::Bfs => "depth ASC, seq ASC",
            Self::Dfs => "depth DESC, seq ASC",
            Self::Random => "RANDOM()",
            Self::Score => "score IS NULL, score DESC, seq ASC",
        }
    }

    pub fn all() -> [Self; 6] {
        [
            Self::Fifo,
            Self::Lifo,
            Self::Bfs,
            Self::Dfs,
            Self::Random,
            Self::Score,
        ]
    }
}

impl fmt::Display for OrderingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fifo => "fifo",
            Self::Lifo => "lifo",
            Self::Bfs => "bfs",
            Self::Dfs => "dfs",
            Self::Random => "random",
            Self::Score => "score",
        };
        write!(f, "{}", name)
    }
}

/// A persisted URL record
#[derive(Debug, Clone, PartialEq)]
pub struct UrlRecord {
    pub fingerprint: String,
    pub url: String,
    pub depth: u32,
    pub created_at: String,
    pub state: UrlState,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub score: Option<f64>,
    pub scheduled: bool,
}

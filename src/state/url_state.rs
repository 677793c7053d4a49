/// URL state definitions for tracking crawl progress
///
/// A URL record only ever moves forward through these states. Storage
/// backends and the strategy worker both consult [`UrlState::can_transition_to`]
/// so that a redelivered event can never drag a record back to an earlier state.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current state of a URL record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UrlState {
    /// Known to the frontier but never handed to a downloader
    NotCrawled,

    /// Selected by `get_next_requests` and handed to a downloader
    Queued,

    /// Fetched successfully
    Crawled,

    /// Fetch failed; the error code is kept on the record
    Error,
}

impl UrlState {
    /// Position of the state in the life-cycle. Terminal states share a rank.
    fn rank(&self) -> u8 {
        match self {
            Self::NotCrawled => 0,
            Self::Queued => 1,
            Self::Crawled | Self::Error => 2,
        }
    }

    /// Returns true if moving from `self` to `next` advances the life-cycle
    ///
    /// Staying in the same state is not a transition, and nothing leaves a
    /// terminal state.
    pub fn can_transition_to(&self, next: UrlState) -> bool {
        next.rank() > self.rank()
    }

    /// Converts the state to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::NotCrawled => "NOT_CRAWLED",
            Self::Queued => "QUEUED",
            Self::Crawled => "CRAWLED",
            Self::Error => "ERROR",
        }
    }

    /// Parses a state from its database string representation
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "NOT_CRAWLED" => Some(Self::NotCrawled),
            "QUEUED" => Some(Self::Queued),
            "CRAWLED" => Some(Self::Crawled),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }

    /// Returns all possible states in life-cycle order
    pub fn all_states() -> Vec<Self> {
        vec![Self::NotCrawled, Self::Queued, Self::Crawled, Self::Error]
    }
}

impl Default for UrlState {
    fn default() -> Self {
        Self::NotCrawled
    }
}

impl fmt::Display for UrlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

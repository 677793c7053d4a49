//! Ripple-Frontier: a distributed crawl frontier
//!
//! This crate decides which URL a fleet of downloaders should fetch next. It
//! persists URL state so the decision survives restarts, keeps busy hosts from
//! starving idle ones, and moves crawl events between cooperating processes
//! over partitioned message streams.

pub mod bus;
pub mod codec;
pub mod config;
pub mod crawler;
pub mod frontier;
pub mod model;
pub mod state;
pub mod storage;
pub mod tester;
pub mod url;
pub mod worker;

use thiserror::Error;

/// Main error type for Ripple-Frontier operations
#[derive(Debug, Error)]
pub enum FrontierError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Message bus error: {0}")]
    Bus(#[from] bus::BusError),

    #[error("Codec error: {0}")]
    Codec(#[from] codec::CodecError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Frontier is not running")]
    NotRunning,
}

impl FrontierError {
    /// True when the message bus itself failed
    ///
    /// Workers stop on these; any other error belongs to a single event.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Bus(_) | Self::Storage(storage::StorageError::Bus(_))
        )
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Spider partition id {partition_id} is outside 0..{partitions}")]
    InvalidPartition { partition_id: u32, partitions: u32 },
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Could not resolve {host}: {reason}")]
    Resolve { host: String, reason: String },
}

/// Result type alias for Ripple-Frontier operations
pub type Result<T> = std::result::Result<T, FrontierError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use model::{DomainInfo, Request, RequestBuilder, RequestMeta, Response};
pub use state::UrlState;
pub use url::{slot_key, DownloaderInfo, KeyType};

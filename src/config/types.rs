use crate::storage::OrderingPolicy;
use crate::url::KeyType;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Ripple-Frontier
///
/// Every section is optional; missing keys take the defaults below.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub frontier: FrontierConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
}

/// Frontier behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FrontierConfig {
    /// Order in which records are handed out
    pub policy: OrderingPolicy,

    /// Batch size when the downloader does not ask for a specific number
    #[serde(rename = "max-next-requests")]
    pub max_next_requests: usize,

    /// Total number of requests to hand out before finishing (0 = unlimited)
    #[serde(rename = "max-requests")]
    pub max_requests: usize,

    /// Carry response bodies on the message bus
    #[serde(rename = "store-content")]
    pub store_content: bool,

    /// Hold back requests for overused slots
    #[serde(rename = "use-overused-buffer")]
    pub use_overused_buffer: bool,

    /// Whether slots are hosts or resolved addresses
    #[serde(rename = "key-type")]
    pub key_type: KeyType,

    /// How long a resolved slot address stays cached (seconds)
    #[serde(rename = "ip-cache-ttl-secs")]
    pub ip_cache_ttl_secs: u64,
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            policy: OrderingPolicy::default(),
            max_next_requests: 64,
            max_requests: 0,
            store_content: false,
            use_overused_buffer: true,
            key_type: KeyType::default(),
            ip_cache_ttl_secs: 300,
        }
    }
}

impl FrontierConfig {
    pub fn ip_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.ip_cache_ttl_secs)
    }
}

/// URL store configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: PathBuf,

    /// Delete every record when the frontier starts
    #[serde(rename = "clear-content")]
    pub clear_content: bool,

    /// Only hand out records a strategy worker has scheduled
    #[serde(rename = "require-scheduling")]
    pub require_scheduling: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("frontier.db"),
            clear_content: false,
            require_scheduling: false,
        }
    }
}

/// Message bus configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    #[serde(rename = "spider-log-partitions")]
    pub spider_log_partitions: u32,

    #[serde(rename = "spider-feed-partitions")]
    pub spider_feed_partitions: u32,

    /// Spider-feed partition owned by this downloader
    #[serde(rename = "spider-partition-id")]
    pub spider_partition_id: u32,

    /// Longest a consumer waits for messages (milliseconds)
    #[serde(rename = "get-timeout-ms")]
    pub get_timeout_ms: u64,

    /// Most messages a worker consumes per cycle
    #[serde(rename = "consumer-batch-size")]
    pub consumer_batch_size: usize,

    /// Interval between spider-feed batches from the storage worker (milliseconds)
    #[serde(rename = "new-batch-delay-ms")]
    pub new_batch_delay_ms: u64,

    /// Feed messages a partition may have outstanding before it gets no new batch
    #[serde(rename = "max-partition-lag")]
    pub max_partition_lag: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            spider_log_partitions: 1,
            spider_feed_partitions: 1,
            spider_partition_id: 0,
            get_timeout_ms: 5000,
            consumer_batch_size: 512,
            new_batch_delay_ms: 30_000,
            max_partition_lag: 128,
        }
    }
}

impl BusConfig {
    pub fn get_timeout(&self) -> Duration {
        Duration::from_millis(self.get_timeout_ms)
    }

    pub fn new_batch_delay(&self) -> Duration {
        Duration::from_millis(self.new_batch_delay_ms)
    }
}

/// Embedded downloader configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// URLs injected when the crawl starts
    pub seeds: Vec<String>,

    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Interval between scheduling rounds (milliseconds)
    #[serde(rename = "scheduler-interval-ms")]
    pub scheduler_interval_ms: u64,

    /// Most requests in flight at once
    #[serde(rename = "concurrent-requests")]
    pub concurrent_requests: usize,

    /// In-flight requests at which a slot counts as overused
    #[serde(rename = "per-slot-concurrency")]
    pub per_slot_concurrency: usize,

    #[serde(rename = "request-timeout-secs")]
    pub request_timeout_secs: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            user_agent: format!("RippleFrontier/{}", env!("CARGO_PKG_VERSION")),
            scheduler_interval_ms: 500,
            concurrent_requests: 256,
            per_slot_concurrency: 8,
            request_timeout_secs: 30,
        }
    }
}

impl CrawlerConfig {
    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

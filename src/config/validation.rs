use crate::config::types::{BusConfig, Config, CrawlerConfig, FrontierConfig, StorageConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_frontier_config(&config.frontier)?;
    validate_storage_config(&config.storage)?;
    validate_bus_config(&config.bus)?;
    validate_crawler_config(&config.crawler)?;
    Ok(())
}

/// Validates frontier configuration
fn validate_frontier_config(config: &FrontierConfig) -> Result<(), ConfigError> {
    if config.max_next_requests < 1 {
        return Err(ConfigError::Validation(format!(
            "max-next-requests must be >= 1, got {}",
            config.max_next_requests
        )));
    }

    if config.ip_cache_ttl_secs < 1 {
        return Err(ConfigError::Validation(
            "ip-cache-ttl-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates message bus configuration
fn validate_bus_config(config: &BusConfig) -> Result<(), ConfigError> {
    if config.spider_log_partitions < 1 {
        return Err(ConfigError::Validation(format!(
            "spider-log-partitions must be >= 1, got {}",
            config.spider_log_partitions
        )));
    }

    if config.spider_feed_partitions < 1 {
        return Err(ConfigError::Validation(format!(
            "spider-feed-partitions must be >= 1, got {}",
            config.spider_feed_partitions
        )));
    }

    if config.spider_partition_id >= config.spider_feed_partitions {
        return Err(ConfigError::InvalidPartition {
            partition_id: config.spider_partition_id,
            partitions: config.spider_feed_partitions,
        });
    }

    if config.get_timeout_ms < 1 {
        return Err(ConfigError::Validation(
            "get-timeout-ms must be >= 1".to_string(),
        ));
    }

    if config.consumer_batch_size < 1 {
        return Err(ConfigError::Validation(format!(
            "consumer-batch-size must be >= 1, got {}",
            config.consumer_batch_size
        )));
    }

    if config.new_batch_delay_ms < 1 {
        return Err(ConfigError::Validation(
            "new-batch-delay-ms must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates embedded downloader configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.per_slot_concurrency < 1 {
        return Err(ConfigError::Validation(format!(
            "per-slot-concurrency must be >= 1, got {}",
            config.per_slot_concurrency
        )));
    }

    if config.concurrent_requests < config.per_slot_concurrency {
        return Err(ConfigError::Validation(format!(
            "concurrent-requests ({}) must be >= per-slot-concurrency ({})",
            config.concurrent_requests, config.per_slot_concurrency
        )));
    }

    if config.scheduler_interval_ms < 1 {
        return Err(ConfigError::Validation(
            "scheduler-interval-ms must be >= 1".to_string(),
        ));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "request-timeout-secs must be >= 1".to_string(),
        ));
    }

    for seed in &config.seeds {
        validate_seed(seed)?;
    }

    Ok(())
}

/// Seeds must be absolute http(s) URLs with a host
fn validate_seed(seed: &str) -> Result<(), ConfigError> {
    let url = Url::parse(seed)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "Seed URL '{}' must use http or https",
            seed
        )));
    }

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "Seed URL '{}' has no host",
            seed
        )));
    }

    Ok(())
}

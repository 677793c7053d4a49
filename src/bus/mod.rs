//! Message bus contracts
//!
//! A bus exposes three independently partitioned streams:
//!
//! - the **spider log** carries events from downloaders,
//! - the **spider feed** carries requests to downloaders, partitioned by slot
//!   key so one downloader owns a stable set of hosts,
//! - the **scoring log** carries score updates from strategy workers to
//!   storage.
//!
//! Delivery is at-least-once. Consumers never block past their timeout and
//! treat a timed-out read as an empty batch.

mod memory;

pub use memory::{MemoryBus, MemoryConsumer, MemoryProducer, MemoryStream};

use sha2::{Digest, Sha256};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by bus transports
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Stream {stream} is closed")]
    Closed { stream: &'static str },

    #[error("Partition {partition_id} does not exist (stream has {partitions})")]
    UnknownPartition { partition_id: u32, partitions: u32 },

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Role a consumer plays; transports that track offsets per group use it as
/// the group name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerRole {
    /// Strategy worker reading its spider-log partition
    StrategyWorker,
    /// Storage worker reading every partition
    DbWorker,
    /// Downloader reading its spider-feed partition
    Spider,
}

impl ConsumerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrategyWorker => "sw",
            Self::DbWorker => "db",
            Self::Spider => "spider",
        }
    }
}

/// Sending half of a stream
pub trait Producer: Send {
    /// Queues a payload; `key` selects the partition, `None` spreads payloads
    /// round-robin
    fn send(&mut self, key: Option<&[u8]>, payload: Vec<u8>) -> BusResult<()>;

    /// Hands every queued payload to the transport
    ///
    /// Consumers are only guaranteed to observe a payload after the flush
    /// that follows its `send`.
    fn flush(&mut self) -> BusResult<()>;

    /// End offset of a partition as seen by this producer
    fn get_offset(&self, partition_id: u32) -> BusResult<u64>;
}

/// Receiving half of a stream
pub trait Consumer: Send {
    /// Waits up to `timeout` and returns at most `count` payloads
    ///
    /// Returns an empty batch when nothing arrives in time.
    fn get_messages(
        &mut self,
        timeout: Duration,
        count: usize,
    ) -> impl Future<Output = BusResult<Vec<Vec<u8>>>> + Send;

    /// Next offset this consumer will read from `partition_id`
    fn get_offset(&self, partition_id: u32) -> BusResult<u64>;
}

/// One partitioned stream of the bus
pub trait Stream: Send + Sync {
    type Producer: Producer;
    type Consumer: Consumer;

    fn name(&self) -> &'static str;

    fn partitions(&self) -> u32;

    fn producer(&self) -> Self::Producer;

    /// Creates a consumer for one partition, or for every partition when
    /// `partition_id` is `None`
    fn consumer(&self, partition_id: Option<u32>, role: ConsumerRole)
        -> BusResult<Self::Consumer>;
}

/// The three streams connecting downloaders, strategy workers and storage
pub trait MessageBus: Send + Sync {
    type Stream: Stream;

    fn spider_log(&self) -> Self::Stream;

    fn spider_feed(&self) -> Self::Stream;

    fn scoring_log(&self) -> Self::Stream;
}

/// Producer type of a bus
pub type ProducerOf<M> = <<M as MessageBus>::Stream as Stream>::Producer;

/// Consumer type of a bus
pub type ConsumerOf<M> = <<M as MessageBus>::Stream as Stream>::Consumer;

/// Maps a partition key to a partition
///
/// The mapping depends only on the key bytes, so every producer in every
/// process routes a given host to the same partition.
pub fn partition_for_key(key: &[u8], partitions: u32) -> u32 {
    let digest = Sha256::digest(key);
    let value = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    value % partitions.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_is_stable() {
        let a = partition_for_key(b"example.com", 8);
        let b = partition_for_key(b"example.com", 8);
        assert_eq!(a, b);
        assert!(a < 8);
    }

    #[test]
    fn test_single_partition() {
        assert_eq!(partition_for_key(b"anything", 1), 0);
        assert_eq!(partition_for_key(b"anything", 0), 0);
    }

    #[test]
    fn test_keys_spread_across_partitions() {
        let used: std::collections::HashSet<u32> = (0..64)
            .map(|i| partition_for_key(format!("host{}.com", i).as_bytes(), 4))
            .collect();
        assert!(used.len() > 1);
    }
}

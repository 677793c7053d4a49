//! Spider side of a distributed frontier
//!
//! Crawl events go out on the spider log, keyed by host so every event about
//! one host lands in the same strategy-worker partition. Requests come in on
//! one spider-feed partition.

use crate::bus::{Consumer, ConsumerOf, ConsumerRole, MessageBus, Producer, ProducerOf, Stream};
use crate::codec::{Decoder, Encoder, JsonCodec};
use crate::config::Config;
use crate::model::{Request, Response};
use crate::storage::{Backend, RequestSource, StorageResult};
use crate::url::DownloaderInfo;
use crate::ConfigError;
use std::collections::BTreeMap;
use std::time::Duration;

/// Partition key for offset reports; all of them go to one partition
const OFFSET_KEY: &[u8] = b"0123456789abcdef0123456789abcdef012345678";

/// Groups requests by host fingerprint
///
/// Requests without domain metadata cannot be routed and are left out.
pub fn aggregate_per_host(requests: &[Request]) -> BTreeMap<String, Vec<Request>> {
    let mut per_host: BTreeMap<String, Vec<Request>> = BTreeMap::new();
    for request in requests {
        match request.domain_fingerprint() {
            Some(key) => per_host.entry(key.to_string()).or_default().push(request.clone()),
            None => tracing::debug!(url = %request.url, "Skipping request without domain"),
        }
    }
    per_host
}

/// Backend that talks to the rest of the frontier over a message bus
pub struct MessageBusBackend<M: MessageBus> {
    codec: JsonCodec,
    spider_log: ProducerOf<M>,
    feed: ConsumerOf<M>,
    partition_id: u32,
    get_timeout: Duration,
    batch_size: usize,
}

impl<M: MessageBus> MessageBusBackend<M> {
    /// Connects to the bus as the downloader owning `bus.spider-partition-id`
    pub fn new(bus: &M, config: &Config) -> crate::Result<Self> {
        let partition_id = config.bus.spider_partition_id;
        let spider_feed = bus.spider_feed();
        if partition_id >= spider_feed.partitions() {
            return Err(ConfigError::InvalidPartition {
                partition_id,
                partitions: spider_feed.partitions(),
            }
            .into());
        }

        let feed = spider_feed.consumer(Some(partition_id), ConsumerRole::Spider)?;
        tracing::info!(partition_id, "Consuming from spider feed partition");

        Ok(Self {
            codec: JsonCodec::new(config.frontier.store_content),
            spider_log: bus.spider_log().producer(),
            feed,
            partition_id,
            get_timeout: config.bus.get_timeout(),
            batch_size: config.bus.consumer_batch_size,
        })
    }

    pub fn partition_id(&self) -> u32 {
        self.partition_id
    }

    /// Announces a new crawl job to the storage worker
    pub fn announce_job(&mut self, job_id: u64) -> StorageResult<()> {
        let message = self.codec.encode_new_job_id(job_id)?;
        self.spider_log.send(None, message)?;
        self.spider_log.flush()?;
        tracing::info!(job_id, "Announced new job");
        Ok(())
    }

    fn send_keyed(&mut self, key: Option<&str>, message: Vec<u8>) -> StorageResult<()> {
        self.spider_log.send(key.map(str::as_bytes), message)?;
        Ok(())
    }

    fn send_links(&mut self, request: &Request, links: &[Request]) -> StorageResult<()> {
        for (key, host_links) in aggregate_per_host(links) {
            let message = self.codec.encode_links_extracted(request, &host_links)?;
            self.send_keyed(Some(&key), message)?;
        }
        Ok(())
    }
}

impl<M: MessageBus> RequestSource for MessageBusBackend<M> {
    async fn get_next_requests(
        &mut self,
        max_n: usize,
        _info: &DownloaderInfo,
    ) -> StorageResult<Vec<Request>> {
        let count = if max_n == 0 { self.batch_size } else { max_n };
        let messages = self.feed.get_messages(self.get_timeout, count).await?;

        let mut requests = Vec::with_capacity(messages.len());
        for message in &messages {
            match self.codec.decode_request(message) {
                Ok(request) => requests.push(request),
                Err(e) => tracing::warn!(error = %e, len = message.len(), "Could not decode feed message"),
            }
        }

        let offset = self.feed.get_offset(self.partition_id)?;
        let report = self.codec.encode_offset(self.partition_id, offset)?;
        self.spider_log.send(Some(OFFSET_KEY), report)?;
        self.spider_log.flush()?;

        Ok(requests)
    }
}

impl<M: MessageBus> Backend for MessageBusBackend<M> {
    async fn start(&mut self) -> StorageResult<()> {
        Ok(())
    }

    async fn stop(&mut self) -> StorageResult<()> {
        self.spider_log.flush()?;
        Ok(())
    }

    async fn add_seeds(&mut self, seeds: &[Request]) -> StorageResult<()> {
        for (key, host_seeds) in aggregate_per_host(seeds) {
            let message = self.codec.encode_add_seeds(&host_seeds)?;
            self.send_keyed(Some(&key), message)?;
        }
        self.spider_log.flush()?;
        Ok(())
    }

    async fn page_crawled(&mut self, response: &Response, links: &[Request]) -> StorageResult<()> {
        let message = self.codec.encode_page_crawled(response, &[])?;
        self.send_keyed(response.request.domain_fingerprint(), message)?;
        self.send_links(&response.request, links)?;
        self.spider_log.flush()?;
        Ok(())
    }

    async fn links_extracted(&mut self, request: &Request, links: &[Request]) -> StorageResult<()> {
        self.send_links(request, links)?;
        self.spider_log.flush()?;
        Ok(())
    }

    async fn request_error(&mut self, request: &Request, error: &str) -> StorageResult<()> {
        let message = self.codec.encode_request_error(request, error)?;
        self.send_keyed(request.domain_fingerprint(), message)?;
        self.spider_log.flush()?;
        Ok(())
    }
}

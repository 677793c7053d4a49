use crate::bus::{Consumer, ConsumerOf, ConsumerRole, MessageBus, Producer, ProducerOf, Stream};
use crate::codec::{CodecError, Decoder, Encoder, Event, JsonCodec};
use crate::config::Config;
use crate::storage::{Backend, StateStore};
use crate::url::DownloaderInfo;
use crate::Result;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Storage side of a distributed frontier
///
/// Applies spider-log events and score updates to the backend, and
/// periodically moves the next batch of requests onto the spider feed.
pub struct DbWorker<M: MessageBus, B> {
    codec: JsonCodec,
    spider_log: ConsumerOf<M>,
    scoring_log: ConsumerOf<M>,
    spider_feed: ProducerOf<M>,
    feed_partitions: u32,
    backend: B,
    get_timeout: Duration,
    batch_size: usize,
    max_next_requests: usize,
    new_batch_delay: Duration,
    max_partition_lag: u64,
    job_id: u64,
    /// Last offset each downloader reported reading up to
    consumed: HashMap<u32, u64>,
    last_batch: Option<Instant>,
    stats: DbWorkerStats,
}

/// Counters kept by a [`DbWorker`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DbWorkerStats {
    pub spider_events: u64,
    pub score_updates: u64,
    pub skipped: u64,
    pub batches: u64,
    pub requests_sent: u64,
}

impl<M, B> DbWorker<M, B>
where
    M: MessageBus,
    B: Backend + StateStore,
{
    pub fn new(bus: &M, backend: B, config: &Config) -> Result<Self> {
        let spider_feed = bus.spider_feed();
        Ok(Self {
            codec: JsonCodec::new(config.frontier.store_content),
            spider_log: bus.spider_log().consumer(None, ConsumerRole::DbWorker)?,
            scoring_log: bus.scoring_log().consumer(None, ConsumerRole::DbWorker)?,
            feed_partitions: spider_feed.partitions(),
            spider_feed: spider_feed.producer(),
            backend,
            get_timeout: config.bus.get_timeout(),
            batch_size: config.bus.consumer_batch_size,
            max_next_requests: config.frontier.max_next_requests,
            new_batch_delay: config.bus.new_batch_delay(),
            max_partition_lag: config.bus.max_partition_lag,
            job_id: 0,
            consumed: HashMap::new(),
            last_batch: None,
            stats: DbWorkerStats::default(),
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn stats(&self) -> DbWorkerStats {
        self.stats
    }

    /// Job id announced by the most recent `new_job_id` event
    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    /// Feed messages produced for `partition_id` that its downloader has not
    /// reported reading yet
    pub fn partition_lag(&self, partition_id: u32) -> Result<u64> {
        let produced = self.spider_feed.get_offset(partition_id)?;
        let consumed = self.consumed.get(&partition_id).copied().unwrap_or(0);
        Ok(produced.saturating_sub(consumed))
    }

    /// Reads one batch from the spider log and applies it
    ///
    /// An event the backend rejects is logged and skipped; only bus failures
    /// are returned.
    pub async fn consume_spider_log(&mut self) -> Result<usize> {
        let messages = self
            .spider_log
            .get_messages(self.get_timeout, self.batch_size)
            .await?;

        for message in &messages {
            let event = match self.codec.decode(message) {
                Ok(event) => event,
                Err(e) => {
                    self.stats.skipped += 1;
                    tracing::warn!(error = %e, len = message.len(), "Could not decode spider log message");
                    continue;
                }
            };

            let kind = event.type_name();
            match self.apply_spider_event(event).await {
                Ok(true) => self.stats.spider_events += 1,
                Ok(false) => self.stats.skipped += 1,
                Err(e) if e.is_transport() => return Err(e),
                Err(e) => {
                    self.stats.skipped += 1;
                    tracing::error!(event = kind, error = %e, "Failed to apply spider log event");
                }
            }
        }

        Ok(messages.len())
    }

    /// Returns false for events that do not belong on the spider log
    async fn apply_spider_event(&mut self, event: Event) -> Result<bool> {
        match event {
            Event::AddSeeds { seeds } => self.backend.add_seeds(&seeds).await?,
            Event::PageCrawled { response, links } => {
                self.backend.page_crawled(&response, &links).await?
            }
            Event::LinksExtracted { request, links } => {
                self.backend.links_extracted(&request, &links).await?
            }
            Event::RequestError { request, error } => {
                self.backend.request_error(&request, &error).await?
            }
            Event::Offset {
                partition_id,
                offset,
            } => self.record_offset(partition_id, offset),
            Event::NewJobId { job_id } => self.adopt_job(job_id)?,
            Event::UpdateScore { .. } => {
                let e = CodecError::UnexpectedEvent("update_score");
                tracing::warn!(error = %e, "Skipping spider log message");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Reads one batch from the scoring log and applies the score updates
    pub async fn consume_scoring_log(&mut self) -> Result<usize> {
        let messages = self
            .scoring_log
            .get_messages(self.get_timeout, self.batch_size)
            .await?;

        for message in &messages {
            match self.codec.decode(message) {
                Ok(Event::UpdateScore {
                    fingerprint,
                    score,
                    url,
                    schedule,
                }) => match self.backend.apply_score(&fingerprint, &url, score, schedule) {
                    Ok(()) => self.stats.score_updates += 1,
                    Err(e) => {
                        let e = crate::FrontierError::from(e);
                        if e.is_transport() {
                            return Err(e);
                        }
                        self.stats.skipped += 1;
                        tracing::error!(%fingerprint, %url, error = %e, "Failed to apply score update");
                    }
                },
                Ok(other) => {
                    self.stats.skipped += 1;
                    let e = CodecError::UnexpectedEvent(other.type_name());
                    tracing::warn!(error = %e, "Skipping scoring log message");
                }
                Err(e) => {
                    self.stats.skipped += 1;
                    tracing::warn!(error = %e, len = message.len(), "Could not decode scoring log message");
                }
            }
        }

        Ok(messages.len())
    }

    /// Publishes the next batch to the spider feed, keyed by host
    ///
    /// Nothing is generated while any feed partition lags more than the
    /// configured maximum. Returns the number of requests sent.
    pub async fn new_batch(&mut self) -> Result<usize> {
        self.last_batch = Some(Instant::now());

        for partition_id in 0..self.feed_partitions {
            let lag = self.partition_lag(partition_id)?;
            if lag > self.max_partition_lag {
                tracing::debug!(partition_id, lag, "Partition lagging, withholding batch");
                return Ok(0);
            }
        }

        let wanted = self.max_next_requests * self.feed_partitions as usize;
        let requests = self
            .backend
            .get_next_requests(wanted, &DownloaderInfo::default())
            .await?;

        for request in &requests {
            let key = request.meta.domain.as_ref().map(|d| d.name.as_bytes());
            let message = self.codec.encode_request(request)?;
            self.spider_feed.send(key, message)?;
        }
        self.spider_feed.flush()?;

        self.stats.batches += 1;
        self.stats.requests_sent += requests.len() as u64;
        if !requests.is_empty() {
            tracing::info!(count = requests.len(), "Published new batch");
        }
        Ok(requests.len())
    }

    /// Consumes both logs and generates batches until `cancel` fires
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        self.backend.start().await?;
        tracing::info!(partitions = self.feed_partitions, "DB worker started");

        let result = self.run_until_cancelled(&cancel).await;
        let flushed: Result<()> = self.spider_feed.flush().map_err(Into::into);
        let stopped: Result<()> = self.backend.stop().await.map_err(Into::into);

        tracing::info!(
            spider_events = self.stats.spider_events,
            score_updates = self.stats.score_updates,
            batches = self.stats.batches,
            "DB worker stopped"
        );
        result.and(flushed).and(stopped)
    }

    async fn run_until_cancelled(&mut self, cancel: &CancellationToken) -> Result<()> {
        while !cancel.is_cancelled() {
            self.consume_spider_log().await?;
            self.consume_scoring_log().await?;

            let due = self
                .last_batch
                .map_or(true, |last| last.elapsed() >= self.new_batch_delay);
            if due {
                self.new_batch().await?;
            }
        }
        Ok(())
    }

    fn record_offset(&mut self, partition_id: u32, offset: u64) {
        if partition_id >= self.feed_partitions {
            tracing::warn!(partition_id, "Offset report for unknown feed partition");
            return;
        }
        let entry = self.consumed.entry(partition_id).or_insert(0);
        *entry = (*entry).max(offset);
        tracing::trace!(partition_id, offset, "Spider offset");
    }

    /// Everything already on the feed counts as consumed by the new job
    fn adopt_job(&mut self, job_id: u64) -> Result<()> {
        self.job_id = job_id;
        for partition_id in 0..self.feed_partitions {
            let produced = self.spider_feed.get_offset(partition_id)?;
            self.consumed.insert(partition_id, produced);
        }
        tracing::info!(job_id, "New job announced");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::model::{Request, Response};
    use crate::state::UrlState;
    use crate::storage::SqliteBackend;
    use std::sync::Arc;

    fn config(feed_partitions: u32) -> Config {
        let mut config = Config::default();
        config.bus.spider_feed_partitions = feed_partitions;
        config.bus.get_timeout_ms = 20;
        config.frontier.max_next_requests = 4;
        config.bus.max_partition_lag = 2;
        config
    }

    fn worker(bus: &MemoryBus, config: &Config) -> DbWorker<MemoryBus, SqliteBackend> {
        let backend = SqliteBackend::new_in_memory().unwrap();
        DbWorker::new(bus, backend, config).unwrap()
    }

    fn publish(stream: crate::bus::MemoryStream, payloads: Vec<Vec<u8>>) {
        let mut producer = stream.producer();
        for payload in payloads {
            producer.send(None, payload).unwrap();
        }
        producer.flush().unwrap();
    }

    async fn feed_requests(bus: &MemoryBus) -> Vec<Request> {
        let mut consumer = bus
            .spider_feed()
            .consumer(None, ConsumerRole::Spider)
            .unwrap();
        let codec = JsonCodec::default();
        consumer
            .get_messages(Duration::from_millis(20), 100)
            .await
            .unwrap()
            .iter()
            .map(|m| codec.decode_request(m).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_applies_spider_log_events() {
        let bus = MemoryBus::new(1, 1);
        let mut worker = worker(&bus, &config(1));
        let codec = JsonCodec::default();

        let seed = Request::new("http://a.com/");
        let response = Response::new(&seed.url, 200, Arc::new(seed.clone()));
        let failed = Request::new("http://a.com/broken");
        publish(
            bus.spider_log(),
            vec![
                codec.encode_add_seeds(&[seed.clone()]).unwrap(),
                codec
                    .encode_page_crawled(&response, &[failed.clone()])
                    .unwrap(),
                codec.encode_request_error(&failed, "HTTP_500").unwrap(),
                codec.encode_update_score("fp", Some(1.0), "http://x/", true).unwrap(),
                b"{}".to_vec(),
            ],
        );

        assert_eq!(worker.consume_spider_log().await.unwrap(), 5);
        assert_eq!(worker.stats().spider_events, 3);
        assert_eq!(worker.stats().skipped, 2);

        let backend = worker.backend();
        let seed_record = backend.get_record(seed.fingerprint()).unwrap().unwrap();
        assert_eq!(seed_record.state, UrlState::Crawled);
        let failed_record = backend.get_record(failed.fingerprint()).unwrap().unwrap();
        assert_eq!(failed_record.state, UrlState::Error);
        assert_eq!(failed_record.depth, 1);
    }

    #[tokio::test]
    async fn test_applies_score_updates() {
        let bus = MemoryBus::new(1, 1);
        let mut worker = worker(&bus, &config(1));
        let codec = JsonCodec::default();
        let request = Request::new("http://a.com/");

        publish(
            bus.scoring_log(),
            vec![
                codec
                    .encode_update_score(request.fingerprint(), Some(0.7), &request.url, true)
                    .unwrap(),
                codec.encode_new_job_id(1).unwrap(),
            ],
        );

        assert_eq!(worker.consume_scoring_log().await.unwrap(), 2);
        assert_eq!(worker.stats().score_updates, 1);
        assert_eq!(worker.stats().skipped, 1);
        let record = worker
            .backend()
            .get_record(request.fingerprint())
            .unwrap()
            .unwrap();
        assert_eq!(record.score, Some(0.7));
    }

    #[tokio::test]
    async fn test_new_batch_goes_to_feed() {
        let bus = MemoryBus::new(1, 1);
        let mut worker = worker(&bus, &config(1));
        let seeds: Vec<Request> = (0..6)
            .map(|i| Request::new(format!("http://h{}.com/", i)))
            .collect();
        worker.backend_mut().add_seeds(&seeds).await.unwrap();

        assert_eq!(worker.new_batch().await.unwrap(), 4);
        let sent = feed_requests(&bus).await;
        assert_eq!(sent.len(), 4);
        assert!(sent.iter().all(|r| r.state() == Some(UrlState::Queued)));
    }

    #[tokio::test]
    async fn test_lagging_partition_withholds_batch() {
        let bus = MemoryBus::new(1, 1);
        let mut worker = worker(&bus, &config(1));
        let seeds: Vec<Request> = (0..10)
            .map(|i| Request::new(format!("http://h{}.com/", i)))
            .collect();
        worker.backend_mut().add_seeds(&seeds).await.unwrap();

        assert_eq!(worker.new_batch().await.unwrap(), 4);
        assert_eq!(worker.partition_lag(0).unwrap(), 4);
        assert_eq!(worker.new_batch().await.unwrap(), 0);

        // The downloader reports having read three of the four messages
        let codec = JsonCodec::default();
        publish(bus.spider_log(), vec![codec.encode_offset(0, 3).unwrap()]);
        worker.consume_spider_log().await.unwrap();
        assert_eq!(worker.partition_lag(0).unwrap(), 1);
        assert_eq!(worker.new_batch().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_new_job_resets_lag() {
        let bus = MemoryBus::new(1, 2);
        let mut worker = worker(&bus, &config(2));
        let seeds: Vec<Request> = (0..8)
            .map(|i| Request::new(format!("http://h{}.com/", i)))
            .collect();
        worker.backend_mut().add_seeds(&seeds).await.unwrap();
        worker.new_batch().await.unwrap();

        let codec = JsonCodec::default();
        publish(bus.spider_log(), vec![codec.encode_new_job_id(7).unwrap()]);
        worker.consume_spider_log().await.unwrap();

        assert_eq!(worker.job_id(), 7);
        assert_eq!(worker.partition_lag(0).unwrap(), 0);
        assert_eq!(worker.partition_lag(1).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejected_event_does_not_stop_consumption() {
        let db_dir = tempfile::TempDir::new().unwrap();
        let path = db_dir.path().join("frontier.db");
        let backend = SqliteBackend::new(&path).unwrap();
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_broken BEFORE INSERT ON urls
                 WHEN NEW.url LIKE '%broken.com%'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let bus = MemoryBus::new(1, 1);
        let mut worker = DbWorker::new(&bus, backend, &config(1)).unwrap();
        let codec = JsonCodec::default();
        let broken = Request::new("http://broken.com/");
        let good = Request::new("http://a.com/");

        publish(
            bus.spider_log(),
            vec![
                codec.encode_add_seeds(&[broken.clone()]).unwrap(),
                codec.encode_add_seeds(&[good.clone()]).unwrap(),
            ],
        );
        publish(
            bus.scoring_log(),
            vec![
                codec
                    .encode_update_score(broken.fingerprint(), Some(1.0), &broken.url, true)
                    .unwrap(),
                codec
                    .encode_update_score(good.fingerprint(), Some(0.5), &good.url, true)
                    .unwrap(),
            ],
        );

        assert_eq!(worker.consume_spider_log().await.unwrap(), 2);
        assert_eq!(worker.consume_scoring_log().await.unwrap(), 2);

        let stats = worker.stats();
        assert_eq!(stats.spider_events, 1);
        assert_eq!(stats.score_updates, 1);
        assert_eq!(stats.skipped, 2);

        let record = worker.backend().get_record(good.fingerprint()).unwrap().unwrap();
        assert_eq!(record.score, Some(0.5));
        assert!(worker.backend().get_record(broken.fingerprint()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let bus = MemoryBus::new(1, 1);
        let mut worker = worker(&bus, &config(1));
        let cancel = CancellationToken::new();
        cancel.cancel();
        worker.run(cancel).await.unwrap();
        assert_eq!(worker.stats().batches, 0);
    }
}

use crate::bus::{Consumer, ConsumerOf, ConsumerRole, MessageBus, ProducerOf, Stream};
use crate::codec::{Decoder, Event, JsonCodec};
use crate::config::Config;
use crate::model::{Request, Response};
use crate::storage::StateStore;
use crate::worker::states::{ScoringStream, StatesContext};
use crate::worker::strategy::{CrawlingStrategy, WorkerContext};
use crate::{ConfigError, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Runs a crawling strategy over one spider-log partition
///
/// Each cycle reads a bounded batch, hands every event to the strategy with
/// states attached, flushes the score updates it produced and writes the
/// resulting states back.
pub struct StrategyWorker<M: MessageBus, S, T> {
    codec: JsonCodec,
    spider_log: ConsumerOf<M>,
    scoring: ScoringStream<ProducerOf<M>>,
    states: StatesContext<S>,
    strategy: T,
    partition_id: u32,
    get_timeout: Duration,
    batch_size: usize,
    cycles: u64,
    events: u64,
    skipped: u64,
}

impl<M, S, T> StrategyWorker<M, S, T>
where
    M: MessageBus,
    S: StateStore,
    T: CrawlingStrategy,
{
    /// Creates a worker for spider-log partition `partition_id`
    pub fn new(bus: &M, store: S, strategy: T, partition_id: u32, config: &Config) -> Result<Self> {
        let spider_log = bus.spider_log();
        if partition_id >= spider_log.partitions() {
            return Err(ConfigError::InvalidPartition {
                partition_id,
                partitions: spider_log.partitions(),
            }
            .into());
        }

        Ok(Self {
            codec: JsonCodec::default(),
            spider_log: spider_log.consumer(Some(partition_id), ConsumerRole::StrategyWorker)?,
            scoring: ScoringStream::new(bus.scoring_log().producer()),
            states: StatesContext::new(store),
            strategy,
            partition_id,
            get_timeout: config.bus.get_timeout(),
            batch_size: config.bus.consumer_batch_size,
            cycles: 0,
            events: 0,
            skipped: 0,
        })
    }

    pub fn strategy(&self) -> &T {
        &self.strategy
    }

    pub fn store(&self) -> &S {
        self.states.store()
    }

    /// Number of completed cycles
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Number of events handed to the strategy
    pub fn events(&self) -> u64 {
        self.events
    }

    /// Number of messages that could not be decoded, were not for us or
    /// failed in the strategy
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Runs one consume/dispatch/flush cycle and returns the number of
    /// messages read
    ///
    /// An event the strategy fails on is logged and skipped. Only bus
    /// failures end the cycle with an error.
    pub async fn run_cycle(&mut self) -> Result<usize> {
        let messages = self
            .spider_log
            .get_messages(self.get_timeout, self.batch_size)
            .await?;

        for message in &messages {
            match self.codec.decode(message) {
                Ok(event) => {
                    let kind = event.type_name();
                    match self.dispatch(event) {
                        Ok(()) => {}
                        Err(e) if e.is_transport() => return Err(e),
                        Err(e) => {
                            self.skipped += 1;
                            tracing::error!(event = kind, error = %e, "Strategy failed on event");
                        }
                    }
                }
                Err(e) => {
                    self.skipped += 1;
                    tracing::warn!(error = %e, len = message.len(), "Could not decode spider log message");
                }
            }
        }

        self.scoring.flush()?;
        self.states.release()?;
        self.cycles += 1;
        if !messages.is_empty() {
            tracing::debug!(
                partition_id = self.partition_id,
                messages = messages.len(),
                cycle = self.cycles,
                "Strategy cycle done"
            );
        }
        Ok(messages.len())
    }

    /// Loops until the strategy is finished or `cancel` fires, then closes
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        tracing::info!(partition_id = self.partition_id, "Strategy worker started");
        let result = self.run_until_done(&cancel).await;
        let closed = self.close();
        tracing::info!(
            partition_id = self.partition_id,
            cycles = self.cycles,
            events = self.events,
            "Strategy worker stopped"
        );
        result.and(closed)
    }

    async fn run_until_done(&mut self, cancel: &CancellationToken) -> Result<()> {
        while !cancel.is_cancelled() {
            self.run_cycle().await?;
            if self.strategy.finished() {
                tracing::info!(partition_id = self.partition_id, "Crawling strategy finished");
                break;
            }
        }
        Ok(())
    }

    /// Closes the strategy, flushes score updates and releases states
    pub fn close(&mut self) -> Result<()> {
        let mut ctx = WorkerContext::new(&mut self.states, &mut self.scoring);
        self.strategy.close(&mut ctx)?;
        self.scoring.flush()?;
        self.states.release()?;
        Ok(())
    }

    fn dispatch(&mut self, event: Event) -> Result<()> {
        match event {
            Event::AddSeeds { mut seeds } => self.on_add_seeds(&mut seeds)?,
            Event::PageCrawled { mut response, links } => {
                self.on_page_crawled(&mut response)?;
                if !links.is_empty() {
                    let request = Request::clone(&response.request);
                    self.on_links_extracted(&request, links)?;
                }
            }
            Event::LinksExtracted { request, links } => self.on_links_extracted(&request, links)?,
            Event::RequestError { mut request, error } => {
                self.on_request_error(&mut request, &error)?
            }
            other => {
                self.skipped += 1;
                tracing::debug!(event = other.type_name(), "Ignoring event");
                return Ok(());
            }
        }
        self.events += 1;
        Ok(())
    }

    fn on_add_seeds(&mut self, seeds: &mut [Request]) -> Result<()> {
        self.states.refresh_and_keep(seeds)?;
        let mut ctx = WorkerContext::new(&mut self.states, &mut self.scoring);
        self.strategy.add_seeds(&mut ctx, seeds)?;
        self.states.update_cache(seeds.iter());
        Ok(())
    }

    fn on_page_crawled(&mut self, response: &mut Response) -> Result<()> {
        self.states
            .refresh_and_keep(std::slice::from_mut(response.request_mut()))?;
        let mut ctx = WorkerContext::new(&mut self.states, &mut self.scoring);
        self.strategy.page_crawled(&mut ctx, response)?;
        self.states.update_cache([response.request.as_ref()]);
        Ok(())
    }

    fn on_links_extracted(&mut self, request: &Request, links: Vec<Request>) -> Result<()> {
        let mut links = self.strategy.filter_extracted_links(request, links);
        self.states.refresh_and_keep(&mut links)?;
        let mut ctx = WorkerContext::new(&mut self.states, &mut self.scoring);
        self.strategy.links_extracted(&mut ctx, request, &mut links)?;
        self.states.update_cache(links.iter());
        Ok(())
    }

    fn on_request_error(&mut self, request: &mut Request, error: &str) -> Result<()> {
        self.states.refresh_and_keep(std::slice::from_mut(request))?;
        let mut ctx = WorkerContext::new(&mut self.states, &mut self.scoring);
        self.strategy.page_error(&mut ctx, request, error)?;
        self.states.update_cache([&*request]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MemoryBus, Producer};
    use crate::codec::Encoder;
    use crate::state::UrlState;
    use crate::storage::{Backend, SqliteBackend, StorageError};
    use crate::worker::strategy::{BasicStrategy, StrategyContext};
    use std::sync::Arc;

    fn config() -> Config {
        let mut config = Config::default();
        config.bus.get_timeout_ms = 20;
        config
    }

    fn publish(bus: &MemoryBus, payloads: Vec<Vec<u8>>) {
        let mut producer = bus.spider_log().producer();
        for payload in payloads {
            producer.send(Some(b"a.com".as_slice()), payload).unwrap();
        }
        producer.flush().unwrap();
    }

    async fn scoring_events(bus: &MemoryBus) -> Vec<Event> {
        let mut consumer = bus
            .scoring_log()
            .consumer(None, ConsumerRole::DbWorker)
            .unwrap();
        let codec = JsonCodec::default();
        consumer
            .get_messages(Duration::from_millis(20), 100)
            .await
            .unwrap()
            .iter()
            .map(|m| codec.decode(m).unwrap())
            .collect()
    }

    #[test]
    fn test_rejects_unknown_partition() {
        let bus = MemoryBus::new(2, 1);
        let store = SqliteBackend::new_in_memory().unwrap();
        let result = StrategyWorker::new(&bus, store, BasicStrategy::new(), 2, &config());
        assert!(matches!(
            result,
            Err(crate::FrontierError::Config(ConfigError::InvalidPartition { .. }))
        ));
    }

    #[tokio::test]
    async fn test_cycle_schedules_and_stores_states() {
        let bus = MemoryBus::new(1, 1);
        let codec = JsonCodec::default();
        let mut store = SqliteBackend::new_in_memory().unwrap();

        let seed = Request::new("http://a.com/");
        store.add_seeds(&[seed.clone()]).await.unwrap();
        let response = Response::new(&seed.url, 200, Arc::new(seed.clone()));
        let links = vec![Request::new("http://a.com/x")];

        publish(
            &bus,
            vec![
                codec.encode_add_seeds(&[seed.clone()]).unwrap(),
                b"not json".to_vec(),
                codec.encode_page_crawled(&response, &[]).unwrap(),
                codec.encode_links_extracted(&seed, &links).unwrap(),
            ],
        );

        let mut worker =
            StrategyWorker::new(&bus, store, BasicStrategy::new(), 0, &config()).unwrap();
        assert_eq!(worker.run_cycle().await.unwrap(), 4);
        assert_eq!(worker.events(), 3);
        assert_eq!(worker.skipped(), 1);

        let record = worker.store().get_record(seed.fingerprint()).unwrap().unwrap();
        assert_eq!(record.state, UrlState::Crawled);

        let scheduled: Vec<String> = scoring_events(&bus)
            .await
            .into_iter()
            .filter_map(|e| match e {
                Event::UpdateScore { url, .. } => Some(url),
                _ => None,
            })
            .collect();
        assert_eq!(scheduled, vec!["http://a.com/", "http://a.com/x"]);
    }

    #[tokio::test]
    async fn test_crawled_page_is_not_rescheduled_as_link() {
        let bus = MemoryBus::new(1, 1);
        let codec = JsonCodec::default();
        let seed = Request::new("http://a.com/");
        let other = Request::new("http://a.com/other");
        let response = Response::new(&seed.url, 200, Arc::new(seed.clone()));

        // The strategy's own store starts empty
        let store = SqliteBackend::new_in_memory().unwrap();
        let mut worker =
            StrategyWorker::new(&bus, store, BasicStrategy::new(), 0, &config()).unwrap();

        publish(
            &bus,
            vec![
                codec.encode_add_seeds(&[seed.clone()]).unwrap(),
                codec.encode_page_crawled(&response, &[]).unwrap(),
            ],
        );
        worker.run_cycle().await.unwrap();

        publish(
            &bus,
            vec![codec.encode_links_extracted(&other, &[seed.clone()]).unwrap()],
        );
        worker.run_cycle().await.unwrap();

        let record = worker.store().get_record(seed.fingerprint()).unwrap().unwrap();
        assert_eq!(record.state, UrlState::Crawled);

        let seed_updates = scoring_events(&bus)
            .await
            .into_iter()
            .filter(|e| matches!(e, Event::UpdateScore { url, .. } if url == &seed.url))
            .count();
        assert_eq!(seed_updates, 1);
    }

    /// Fails on pages from one host and schedules everything else
    struct PickyStrategy {
        inner: BasicStrategy,
    }

    impl CrawlingStrategy for PickyStrategy {
        fn add_seeds(&mut self, ctx: &mut dyn StrategyContext, seeds: &mut [Request]) -> Result<()> {
            if seeds.iter().any(|s| s.url.contains("broken.com")) {
                return Err(StorageError::Serialization("unsupported seed".to_string()).into());
            }
            self.inner.add_seeds(ctx, seeds)
        }

        fn page_crawled(&mut self, ctx: &mut dyn StrategyContext, response: &mut Response) -> Result<()> {
            self.inner.page_crawled(ctx, response)
        }

        fn links_extracted(
            &mut self,
            ctx: &mut dyn StrategyContext,
            request: &Request,
            links: &mut [Request],
        ) -> Result<()> {
            self.inner.links_extracted(ctx, request, links)
        }

        fn page_error(
            &mut self,
            ctx: &mut dyn StrategyContext,
            request: &mut Request,
            error: &str,
        ) -> Result<()> {
            self.inner.page_error(ctx, request, error)
        }
    }

    #[tokio::test]
    async fn test_failed_event_does_not_stop_the_cycle() {
        let bus = MemoryBus::new(1, 1);
        let codec = JsonCodec::default();
        publish(
            &bus,
            vec![
                codec.encode_add_seeds(&[Request::new("http://broken.com/")]).unwrap(),
                codec.encode_add_seeds(&[Request::new("http://a.com/")]).unwrap(),
            ],
        );

        let store = SqliteBackend::new_in_memory().unwrap();
        let strategy = PickyStrategy {
            inner: BasicStrategy::new(),
        };
        let mut worker = StrategyWorker::new(&bus, store, strategy, 0, &config()).unwrap();
        assert_eq!(worker.run_cycle().await.unwrap(), 2);
        assert_eq!(worker.events(), 1);
        assert_eq!(worker.skipped(), 1);

        let scheduled: Vec<String> = scoring_events(&bus)
            .await
            .into_iter()
            .filter_map(|e| match e {
                Event::UpdateScore { url, .. } => Some(url),
                _ => None,
            })
            .collect();
        assert_eq!(scheduled, vec!["http://a.com/"]);
    }

    #[tokio::test]
    async fn test_stops_when_strategy_finishes() {
        let bus = MemoryBus::new(1, 1);
        let codec = JsonCodec::default();
        let request = Request::new("http://a.com/");
        publish(
            &bus,
            vec![codec.encode_request_error(&request, "TIMEOUT_ERROR").unwrap()],
        );

        let store = SqliteBackend::new_in_memory().unwrap();
        let strategy = BasicStrategy::new().with_max_pages(1);
        let mut worker = StrategyWorker::new(&bus, store, strategy, 0, &config()).unwrap();
        worker.run(CancellationToken::new()).await.unwrap();

        assert_eq!(worker.strategy().errors(), 1);
        assert_eq!(worker.cycles(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_worker_exits() {
        let bus = MemoryBus::new(1, 1);
        let store = SqliteBackend::new_in_memory().unwrap();
        let mut worker =
            StrategyWorker::new(&bus, store, BasicStrategy::new(), 0, &config()).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        worker.run(cancel).await.unwrap();
        assert_eq!(worker.cycles(), 0);
    }
}

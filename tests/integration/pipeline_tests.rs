//! Integration tests for the distributed pipeline
//!
//! A downloader-side frontier, a strategy worker and a storage worker talk
//! over an in-memory bus. Each test drives the three by hand, one cycle at a
//! time, so the message flow is deterministic.

use ripple_frontier::bus::MemoryBus;
use ripple_frontier::config::Config;
use ripple_frontier::frontier::{FrontierManager, MessageBusBackend};
use ripple_frontier::storage::{open_backend, SqliteBackend};
use ripple_frontier::worker::{BasicStrategy, DbWorker, StrategyWorker};
use ripple_frontier::{DownloaderInfo, Request, RequestMeta, Response, UrlState};
use std::sync::Arc;
use tempfile::TempDir;

struct Pipeline {
    spider: FrontierManager<MessageBusBackend<MemoryBus>>,
    strategy: StrategyWorker<MemoryBus, SqliteBackend, BasicStrategy>,
    db: DbWorker<MemoryBus, SqliteBackend>,
}

impl Pipeline {
    async fn new(db_dir: &TempDir) -> Self {
        let mut config = Config::default();
        config.bus.get_timeout_ms = 20;
        config.storage.require_scheduling = true;
        config.storage.database_path = db_dir.path().join("frontier.db");

        let bus = MemoryBus::from_config(&config.bus);

        let backend = MessageBusBackend::new(&bus, &config).expect("Failed to connect spider");
        let mut spider = FrontierManager::new(backend);
        spider.start().await.expect("Failed to start spider");

        let states = SqliteBackend::new_in_memory().expect("Failed to open states");
        let strategy = StrategyWorker::new(&bus, states, BasicStrategy::new(), 0, &config)
            .expect("Failed to create strategy worker");

        let storage = open_backend(&config).expect("Failed to open DB");
        let db = DbWorker::new(&bus, storage, &config).expect("Failed to create db worker");

        Self {
            spider,
            strategy,
            db,
        }
    }

    /// Moves everything published so far through the strategy and storage
    /// workers and generates one batch
    async fn settle(&mut self) -> usize {
        self.strategy.run_cycle().await.expect("Strategy cycle failed");
        self.db.consume_spider_log().await.expect("Spider log failed");
        self.db.consume_scoring_log().await.expect("Scoring log failed");
        self.db.new_batch().await.expect("New batch failed")
    }

    async fn next_requests(&mut self) -> Vec<Request> {
        self.spider
            .get_next_requests(0, &DownloaderInfo::default())
            .await
            .expect("Failed to read feed")
    }

    fn state(&self, url: &str) -> Option<UrlState> {
        self.db
            .backend()
            .get_record(Request::new(url).fingerprint())
            .expect("Failed to read record")
            .map(|record| record.state)
    }
}

#[tokio::test]
async fn test_seed_to_feed_and_back() {
    let db_dir = TempDir::new().expect("Failed to create temp dir");
    let mut pipeline = Pipeline::new(&db_dir).await;

    pipeline
        .spider
        .add_seeds(vec![Request::new("http://a.com/")])
        .await
        .expect("Failed to add seeds");

    // The strategy schedules the seed, so storage publishes it
    assert_eq!(pipeline.settle().await, 1);
    let batch = pipeline.next_requests().await;
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].url, "http://a.com/");

    // Report the page with two links
    let seed = batch[0].clone();
    let response = Response::new(seed.url.clone(), 200, Arc::new(seed));
    pipeline
        .spider
        .page_crawled(
            &response,
            vec![Request::new("http://a.com/1"), Request::new("http://b.com/1")],
        )
        .await
        .expect("Failed to report page");

    assert_eq!(pipeline.settle().await, 2);
    let mut urls: Vec<String> = pipeline
        .next_requests()
        .await
        .into_iter()
        .map(|r| r.url)
        .collect();
    urls.sort();
    assert_eq!(urls, vec!["http://a.com/1", "http://b.com/1"]);

    assert_eq!(pipeline.state("http://a.com/"), Some(UrlState::Crawled));
    assert_eq!(pipeline.state("http://a.com/1"), Some(UrlState::Queued));

    let link = pipeline
        .db
        .backend()
        .get_record(Request::new("http://a.com/1").fingerprint())
        .expect("Failed to read record")
        .expect("Link should be stored");
    assert_eq!(link.depth, 1);
    assert_eq!(link.score, Some(BasicStrategy::LINK_SCORE));
    assert!(link.scheduled);
}

#[tokio::test]
async fn test_errors_reach_storage_and_strategy() {
    let db_dir = TempDir::new().expect("Failed to create temp dir");
    let mut pipeline = Pipeline::new(&db_dir).await;

    pipeline
        .spider
        .add_seeds(vec![Request::new("http://a.com/")])
        .await
        .expect("Failed to add seeds");
    pipeline.settle().await;
    let batch = pipeline.next_requests().await;

    pipeline
        .spider
        .request_error(&batch[0], "DNS_ERROR")
        .await
        .expect("Failed to report error");
    assert_eq!(pipeline.settle().await, 0);

    assert_eq!(pipeline.state("http://a.com/"), Some(UrlState::Error));
    assert_eq!(pipeline.strategy.strategy().errors(), 1);
    assert!(pipeline.next_requests().await.is_empty());
}

#[tokio::test]
async fn test_unscheduled_links_stay_out_of_the_feed() {
    let db_dir = TempDir::new().expect("Failed to create temp dir");
    let mut pipeline = Pipeline::new(&db_dir).await;

    pipeline
        .spider
        .add_seeds(vec![Request::new("http://a.com/")])
        .await
        .expect("Failed to add seeds");
    pipeline.settle().await;
    let batch = pipeline.next_requests().await;
    let seed = batch[0].clone();
    let response = Response::new(seed.url.clone(), 200, Arc::new(seed));
    pipeline
        .spider
        .page_crawled(&response, vec![Request::new("http://a.com/1")])
        .await
        .expect("Failed to report page");

    // Storage sees the link before the strategy has scored it
    pipeline.db.consume_spider_log().await.expect("Spider log failed");
    assert_eq!(pipeline.db.new_batch().await.expect("New batch failed"), 0);
    assert_eq!(pipeline.state("http://a.com/1"), Some(UrlState::NotCrawled));

    // Once scored it is published
    assert_eq!(pipeline.settle().await, 1);
}

#[tokio::test]
async fn test_reports_without_metadata_are_keyed_by_url() {
    let db_dir = TempDir::new().expect("Failed to create temp dir");
    let mut pipeline = Pipeline::new(&db_dir).await;

    pipeline
        .spider
        .add_seeds(vec![Request::new("http://a.com/"), Request::new("http://b.com/")])
        .await
        .expect("Failed to add seeds");
    assert_eq!(pipeline.settle().await, 2);
    assert_eq!(pipeline.next_requests().await.len(), 2);

    // A downloader that drops request metadata between fetch and report
    let mut crawled = Request::new("http://a.com/");
    crawled.meta = RequestMeta::default();
    let response = Response::new(crawled.url.clone(), 200, Arc::new(crawled));
    pipeline
        .spider
        .page_crawled(&response, vec![Request::new("http://a.com/1")])
        .await
        .expect("Failed to report page");

    let mut failed = Request::new("http://b.com/");
    failed.meta = RequestMeta::default();
    pipeline
        .spider
        .request_error(&failed, "DNS_ERROR")
        .await
        .expect("Failed to report error");

    assert_eq!(pipeline.settle().await, 1);
    assert_eq!(pipeline.state("http://a.com/"), Some(UrlState::Crawled));
    assert_eq!(pipeline.state("http://b.com/"), Some(UrlState::Error));

    // The strategy kept its own view under the same keys
    let strategy_view = pipeline
        .strategy
        .store()
        .get_record(Request::new("http://a.com/").fingerprint())
        .expect("Failed to read strategy state")
        .map(|record| record.state);
    assert_eq!(strategy_view, Some(UrlState::Crawled));
}

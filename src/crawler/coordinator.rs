//! Embedded downloader loop
//!
//! A timer drives scheduling: every tick the coordinator asks the frontier for
//! as many requests as it has free capacity, reporting slots that already have
//! `per-slot-concurrency` fetches in flight as overused. Finished fetches are
//! reported back as crawled pages or request errors.

use crate::config::Config;
use crate::crawler::fetcher::{build_http_client, fetch, FetchOutcome};
use crate::crawler::parser::{extract_links, links_to_requests};
use crate::frontier::{FrontierManager, OverusedBuffer};
use crate::model::{Request, Response};
use crate::storage::{open_backend, Backend};
use crate::url::{DownloaderInfo, KeyType, SlotResolver};
use crate::Result;
use reqwest::Client;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Totals reported when a crawl ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub fetched: u64,
    pub failed: u64,
    pub links: u64,
}

/// Drives fetching for one frontier
pub struct Coordinator<B: Backend> {
    frontier: FrontierManager<B>,
    client: Client,
    resolver: SlotResolver,
    key_type: KeyType,
    interval: Duration,
    concurrent_requests: usize,
    per_slot_concurrency: usize,
    /// In-flight fetches per slot key
    in_flight: HashMap<String, usize>,
    stats: CrawlStats,
}

impl<B: Backend> Coordinator<B> {
    /// Creates a coordinator around a started frontier
    ///
    /// `resolver` must be the one the frontier's overused buffer uses, if it
    /// has one, so both sides agree on slot keys.
    pub fn new(frontier: FrontierManager<B>, resolver: SlotResolver, config: &Config) -> Result<Self> {
        Ok(Self {
            frontier,
            client: build_http_client(&config.crawler)?,
            resolver,
            key_type: config.frontier.key_type,
            interval: config.crawler.scheduler_interval(),
            concurrent_requests: config.crawler.concurrent_requests,
            per_slot_concurrency: config.crawler.per_slot_concurrency,
            in_flight: HashMap::new(),
            stats: CrawlStats::default(),
        })
    }

    pub fn frontier(&self) -> &FrontierManager<B> {
        &self.frontier
    }

    pub fn frontier_mut(&mut self) -> &mut FrontierManager<B> {
        &mut self.frontier
    }

    pub fn stats(&self) -> CrawlStats {
        self.stats
    }

    /// Slots at or over their concurrency limit
    pub fn overused_keys(&self) -> Vec<String> {
        self.in_flight
            .iter()
            .filter(|(_, count)| **count >= self.per_slot_concurrency)
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn downloader_info(&self) -> DownloaderInfo {
        DownloaderInfo::with_overused(self.key_type, self.overused_keys())
    }

    /// Crawls until the frontier has nothing left or `cancel` fires
    ///
    /// On cancellation no new batch is requested; fetches already in flight
    /// are awaited and reported.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<CrawlStats> {
        let started = Instant::now();
        let mut tasks: JoinSet<(String, FetchOutcome)> = JoinSet::new();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(in_flight = tasks.len(), "Crawl cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    let scheduled = self.schedule(&mut tasks).await?;
                    if scheduled == 0 && tasks.is_empty() {
                        tracing::info!("Frontier exhausted");
                        break;
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    self.complete(joined).await?;
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            self.complete(joined).await?;
        }

        tracing::info!(
            fetched = self.stats.fetched,
            failed = self.stats.failed,
            links = self.stats.links,
            elapsed = ?started.elapsed(),
            "Crawl finished"
        );
        Ok(self.stats)
    }

    /// Requests one batch sized to the free capacity and spawns its fetches
    async fn schedule(&mut self, tasks: &mut JoinSet<(String, FetchOutcome)>) -> Result<usize> {
        if self.frontier.finished() {
            return Ok(0);
        }
        let gap = self.concurrent_requests.saturating_sub(tasks.len());
        if gap == 0 {
            return Ok(0);
        }

        let info = self.downloader_info();
        let requests = self.frontier.get_next_requests(gap, &info).await?;
        for request in requests.iter().cloned() {
            let slot = self.resolver.slot_key(&request, self.key_type).await;
            *self.in_flight.entry(slot.clone()).or_insert(0) += 1;

            let client = self.client.clone();
            tasks.spawn(async move { (slot, fetch(&client, request).await) });
        }

        if !requests.is_empty() {
            tracing::debug!(
                count = requests.len(),
                in_flight = tasks.len(),
                overused = info.overused_keys.len(),
                "Scheduled requests"
            );
        }
        Ok(requests.len())
    }

    async fn complete(
        &mut self,
        joined: std::result::Result<(String, FetchOutcome), tokio::task::JoinError>,
    ) -> Result<()> {
        let (slot, outcome) = match joined {
            Ok(done) => done,
            Err(e) => {
                tracing::error!(error = %e, "Fetch task failed");
                return Ok(());
            }
        };

        if let Some(count) = self.in_flight.get_mut(&slot) {
            *count -= 1;
            if *count == 0 {
                self.in_flight.remove(&slot);
            }
        }

        match outcome {
            FetchOutcome::Fetched { response, html } => {
                let links = page_links(&response, html.as_deref());
                self.stats.fetched += 1;
                self.stats.links += links.len() as u64;
                tracing::debug!(url = %response.url, status = response.status_code, links = links.len(), "Page crawled");
                self.frontier.page_crawled(&response, links).await
            }
            FetchOutcome::Failed { request, error } => {
                self.stats.failed += 1;
                tracing::debug!(url = %request.url, %error, "Request failed");
                self.frontier.request_error(&request, &error).await
            }
        }
    }
}

fn page_links(response: &Response, html: Option<&str>) -> Vec<Request> {
    let Some(html) = html else {
        return Vec::new();
    };
    match Url::parse(&response.url) {
        Ok(base) => links_to_requests(extract_links(html, &base)),
        Err(e) => {
            tracing::warn!(url = %response.url, error = %e, "Unparseable page URL");
            Vec::new()
        }
    }
}

/// Runs an embedded crawl with the configured store and seeds
///
/// # Arguments
///
/// * `config` - Loaded configuration
/// * `cancel` - Fires to stop the crawl early
///
/// # Example
///
/// ```no_run
/// use ripple_frontier::config::load_config;
/// use ripple_frontier::crawler::run_crawl;
/// use std::path::Path;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new("frontier.toml"))?;
/// let stats = run_crawl(&config, CancellationToken::new()).await?;
/// println!("{} pages fetched", stats.fetched);
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(config: &Config, cancel: CancellationToken) -> Result<CrawlStats> {
    let backend = open_backend(config)?;
    let resolver = SlotResolver::new(config.frontier.ip_cache_ttl());

    if config.frontier.use_overused_buffer {
        let buffered = OverusedBuffer::with_resolver(backend, resolver.clone());
        crawl_with(buffered, resolver, config, cancel).await
    } else {
        crawl_with(backend, resolver, config, cancel).await
    }
}

async fn crawl_with<B: Backend>(
    backend: B,
    resolver: SlotResolver,
    config: &Config,
    cancel: CancellationToken,
) -> Result<CrawlStats> {
    let mut frontier = FrontierManager::new(backend)
        .with_max_next_requests(config.frontier.max_next_requests)
        .with_max_requests(config.frontier.max_requests);
    frontier.start().await?;

    let seeds = config.crawler.seeds.iter().map(Request::new).collect();
    frontier.add_seeds(seeds).await?;

    let mut coordinator = Coordinator::new(frontier, resolver, config)?;
    let result = coordinator.run(cancel).await;
    coordinator.frontier_mut().stop().await?;
    result
}

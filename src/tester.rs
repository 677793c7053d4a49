//! Offline frontier harness
//!
//! [`FrontierTester`] runs a frontier against a [`CrawlGraph`] (a fake web
//! described up front) and a [`DownloaderSimulator`], and records the order in
//! which requests were handed out. It is how ordering policies and the
//! overused buffer are exercised without a network.

use crate::frontier::FrontierManager;
use crate::model::{Request, Response};
use crate::storage::Backend;
use crate::url::{extract_host, DownloaderInfo, KeyType};
use crate::Result;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// One page of a [`CrawlGraph`]
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlPage {
    pub url: String,
    pub status: u16,
    pub links: Vec<String>,
    /// Error code reported instead of a response
    pub error: Option<String>,
    pub is_seed: bool,
}

impl CrawlPage {
    pub fn has_errors(&self) -> bool {
        self.error.is_some()
    }
}

/// A fake web: pages, their links and which pages are seeds
#[derive(Debug, Clone, Default)]
pub struct CrawlGraph {
    pages: Vec<CrawlPage>,
    index: HashMap<String, usize>,
}

impl CrawlGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from `(url, links)` pairs; the first page is the seed
    pub fn from_links(pages: &[(&str, &[&str])]) -> Self {
        let mut graph = Self::new();
        for (i, (url, links)) in pages.iter().enumerate() {
            let links = links.iter().map(|l| l.to_string()).collect();
            if i == 0 {
                graph.add_seed(url, links);
            } else {
                graph.add_page(url, 200, links);
            }
        }
        graph
    }

    pub fn add_seed(&mut self, url: &str, links: Vec<String>) -> &mut Self {
        self.insert(CrawlPage {
            url: url.to_string(),
            status: 200,
            links,
            error: None,
            is_seed: true,
        })
    }

    pub fn add_page(&mut self, url: &str, status: u16, links: Vec<String>) -> &mut Self {
        self.insert(CrawlPage {
            url: url.to_string(),
            status,
            links,
            error: None,
            is_seed: false,
        })
    }

    /// Adds a page whose download fails with `error`
    pub fn add_error_page(&mut self, url: &str, error: &str) -> &mut Self {
        self.insert(CrawlPage {
            url: url.to_string(),
            status: 0,
            links: Vec::new(),
            error: Some(error.to_string()),
            is_seed: false,
        })
    }

    fn insert(&mut self, page: CrawlPage) -> &mut Self {
        match self.index.get(&page.url) {
            Some(&i) => self.pages[i] = page,
            None => {
                self.index.insert(page.url.clone(), self.pages.len());
                self.pages.push(page);
            }
        }
        self
    }

    pub fn get_page(&self, url: &str) -> Option<&CrawlPage> {
        self.index.get(url).map(|&i| &self.pages[i])
    }

    pub fn seeds(&self) -> impl Iterator<Item = &CrawlPage> {
        self.pages.iter().filter(|p| p.is_seed)
    }

    pub fn pages(&self) -> &[CrawlPage] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Stands in for a downloader's queueing behavior
pub trait DownloaderSimulator {
    /// Accepts the requests the frontier just handed out
    fn update(&mut self, requests: Vec<Request>);

    /// Returns the requests completed in this iteration
    fn download(&mut self) -> Vec<Request>;

    /// Slot keys the downloader currently considers overused
    fn overused_keys(&self) -> Vec<String>;

    /// True when nothing is waiting to be downloaded
    fn idle(&self) -> bool;
}

/// Downloads everything it is given in the same iteration
#[derive(Debug, Default)]
pub struct BaseDownloaderSimulator {
    requests: Vec<Request>,
}

impl DownloaderSimulator for BaseDownloaderSimulator {
    fn update(&mut self, requests: Vec<Request>) {
        self.requests = requests;
    }

    fn download(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.requests)
    }

    fn overused_keys(&self) -> Vec<String> {
        Vec::new()
    }

    fn idle(&self) -> bool {
        true
    }
}

/// Downloads at most `rate` requests per host per iteration
///
/// A host with more than `rate` requests waiting is reported as overused.
#[derive(Debug)]
pub struct DomainDownloaderSimulator {
    rate: usize,
    slots: HashMap<String, VecDeque<Request>>,
    /// Hosts in arrival order, so downloads are deterministic
    order: Vec<String>,
}

impl DomainDownloaderSimulator {
    pub fn new(rate: usize) -> Self {
        Self {
            rate: rate.max(1),
            slots: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Requests waiting for `host`
    pub fn waiting(&self, host: &str) -> usize {
        self.slots.get(host).map_or(0, VecDeque::len)
    }
}

impl DownloaderSimulator for DomainDownloaderSimulator {
    fn update(&mut self, requests: Vec<Request>) {
        for request in requests {
            let host = extract_host(&request.url).unwrap_or_default();
            if !self.slots.contains_key(&host) {
                self.order.push(host.clone());
            }
            self.slots.entry(host).or_default().push_back(request);
        }
    }

    fn download(&mut self) -> Vec<Request> {
        let mut output = Vec::new();
        for host in &self.order {
            if let Some(queue) = self.slots.get_mut(host) {
                let n = queue.len().min(self.rate);
                output.extend(queue.drain(..n));
            }
        }
        self.slots.retain(|_, queue| !queue.is_empty());
        let slots = &self.slots;
        self.order.retain(|host| slots.contains_key(host));
        output
    }

    fn overused_keys(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|host| self.waiting(host) > self.rate)
            .cloned()
            .collect()
    }

    fn idle(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Drives a frontier through a fake crawl
pub struct FrontierTester<B: Backend, D> {
    frontier: FrontierManager<B>,
    graph: CrawlGraph,
    downloader: D,
    max_next_requests: usize,
    sequence: Vec<Request>,
}

impl<B: Backend, D: DownloaderSimulator> FrontierTester<B, D> {
    pub fn new(frontier: FrontierManager<B>, graph: CrawlGraph, downloader: D) -> Self {
        Self {
            frontier,
            graph,
            downloader,
            max_next_requests: 0,
            sequence: Vec::new(),
        }
    }

    /// Batch size per iteration; `0` uses the frontier's own default
    pub fn with_max_next_requests(mut self, max_next_requests: usize) -> Self {
        self.max_next_requests = max_next_requests;
        self
    }

    /// Crawls the graph until the frontier and the downloader are both idle
    ///
    /// With `add_all_pages` every known page is injected up front instead of
    /// only the seeds.
    pub async fn run(&mut self, add_all_pages: bool) -> Result<()> {
        if !self.frontier.is_running() {
            self.frontier.start().await?;
        }
        if add_all_pages {
            self.add_all().await?;
        } else {
            let seeds = self.graph.seeds().map(|p| Request::new(&p.url)).collect();
            self.frontier.add_seeds(seeds).await?;
        }

        loop {
            let requests = self.run_iteration().await?;
            let done = requests.is_empty() && self.downloader.idle();
            self.sequence.extend(requests);
            if done || self.frontier.finished() {
                break;
            }
        }

        self.frontier.stop().await
    }

    /// Requests handed out so far, in order
    pub fn sequence(&self) -> &[Request] {
        &self.sequence
    }

    pub fn sequence_urls(&self) -> Vec<&str> {
        self.sequence.iter().map(|r| r.url.as_str()).collect()
    }

    pub fn frontier(&self) -> &FrontierManager<B> {
        &self.frontier
    }

    pub fn downloader(&self) -> &D {
        &self.downloader
    }

    async fn add_all(&mut self) -> Result<()> {
        let mut requests = Vec::new();
        for page in self.graph.pages() {
            if page.is_seed {
                requests.push(Request::new(&page.url));
            }
            if !page.has_errors() {
                requests.extend(page.links.iter().map(Request::new));
            }
        }
        self.frontier.add_seeds(requests).await
    }

    async fn run_iteration(&mut self) -> Result<Vec<Request>> {
        let info = DownloaderInfo::with_overused(KeyType::Domain, self.downloader.overused_keys());
        let requests = self
            .frontier
            .get_next_requests(self.max_next_requests, &info)
            .await?;

        self.downloader.update(requests.clone());

        for request in self.downloader.download() {
            match self.graph.get_page(&request.url) {
                Some(page) if !page.has_errors() => {
                    let links = page.links.iter().map(Request::new).collect();
                    let response = Response::new(request.url.clone(), page.status, Arc::new(request));
                    self.frontier.page_crawled(&response, links).await?;
                }
                Some(page) => {
                    let error = page.error.clone().unwrap_or_default();
                    self.frontier.request_error(&request, &error).await?;
                }
                None => self.frontier.request_error(&request, "HTTP_404").await?,
            }
        }

        Ok(requests)
    }
}

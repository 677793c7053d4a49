//! Crawling strategies
//!
//! A strategy decides what gets crawled and with which priority. The strategy
//! worker calls it once per spider-log event, with the persisted state of
//! every involved URL already attached to `meta.state`. Whatever states the
//! strategy leaves on those requests are written back after the cycle.

use crate::bus::Producer;
use crate::model::{Request, Response};
use crate::state::UrlState;
use crate::storage::StateStore;
use crate::worker::states::{ScoringStream, StatesContext};
use crate::Result;

/// Callbacks a strategy can make into the worker
pub trait StrategyContext {
    /// Emits a score update; `dont_queue` records the score without making
    /// the URL fetchable
    fn schedule(&mut self, request: &Request, score: f64, dont_queue: bool) -> Result<()>;

    /// Attaches current states to requests the strategy created itself
    fn refresh_states(&mut self, requests: &mut [Request]) -> Result<()>;
}

/// Context backed by a state cache and a scoring-log stream
pub struct WorkerContext<'a, S, P> {
    pub(crate) states: &'a mut StatesContext<S>,
    pub(crate) scoring: &'a mut ScoringStream<P>,
}

impl<'a, S: StateStore, P: Producer> WorkerContext<'a, S, P> {
    pub fn new(states: &'a mut StatesContext<S>, scoring: &'a mut ScoringStream<P>) -> Self {
        Self { states, scoring }
    }
}

impl<S: StateStore, P: Producer> StrategyContext for WorkerContext<'_, S, P> {
    fn schedule(&mut self, request: &Request, score: f64, dont_queue: bool) -> Result<()> {
        self.scoring.send(request, score, dont_queue)
    }

    fn refresh_states(&mut self, requests: &mut [Request]) -> Result<()> {
        self.states.refresh_and_keep(requests)?;
        Ok(())
    }
}

/// The capability set of a crawling strategy
///
/// Only the event callbacks are required. `filter_extracted_links` keeps
/// every link, `finished` never ends the crawl and `close` does nothing.
pub trait CrawlingStrategy: Send {
    /// New seeds were injected
    fn add_seeds(&mut self, ctx: &mut dyn StrategyContext, seeds: &mut [Request]) -> Result<()>;

    /// A page was fetched; its request carries the state
    fn page_crawled(&mut self, ctx: &mut dyn StrategyContext, response: &mut Response) -> Result<()>;

    /// Narrows the links whose states are worth looking up
    ///
    /// Links left out here are not rejected, only not tracked.
    fn filter_extracted_links(&mut self, _request: &Request, links: Vec<Request>) -> Vec<Request> {
        links
    }

    /// Links were extracted from a fetched page
    fn links_extracted(
        &mut self,
        ctx: &mut dyn StrategyContext,
        request: &Request,
        links: &mut [Request],
    ) -> Result<()>;

    /// A fetch failed with the given error code
    fn page_error(
        &mut self,
        ctx: &mut dyn StrategyContext,
        request: &mut Request,
        error: &str,
    ) -> Result<()>;

    /// Checked after every cycle; `true` stops the worker
    fn finished(&self) -> bool {
        false
    }

    /// Called once before the worker shuts down
    fn close(&mut self, _ctx: &mut dyn StrategyContext) -> Result<()> {
        Ok(())
    }
}

/// Breadth-first discovery strategy
///
/// Seeds are scheduled with score 1.0, newly discovered links with 0.5.
/// Fetched pages move to CRAWLED, failed ones to ERROR.
#[derive(Debug, Clone, Default)]
pub struct BasicStrategy {
    max_pages: Option<usize>,
    crawled: usize,
    errors: usize,
}

impl BasicStrategy {
    pub const SEED_SCORE: f64 = 1.0;
    pub const LINK_SCORE: f64 = 0.5;

    pub fn new() -> Self {
        Self::default()
    }

    /// Finish once this many pages have been fetched or failed
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    pub fn crawled(&self) -> usize {
        self.crawled
    }

    pub fn errors(&self) -> usize {
        self.errors
    }

    fn schedule_new(
        ctx: &mut dyn StrategyContext,
        requests: &[Request],
        score: f64,
    ) -> Result<usize> {
        let mut scheduled = 0;
        for request in requests {
            if request.state() == Some(UrlState::NotCrawled) {
                ctx.schedule(request, score, false)?;
                scheduled += 1;
            }
        }
        Ok(scheduled)
    }
}

impl CrawlingStrategy for BasicStrategy {
    fn add_seeds(&mut self, ctx: &mut dyn StrategyContext, seeds: &mut [Request]) -> Result<()> {
        let scheduled = Self::schedule_new(ctx, seeds, Self::SEED_SCORE)?;
        tracing::debug!(seeds = seeds.len(), scheduled, "Seeds added");
        Ok(())
    }

    fn page_crawled(&mut self, _ctx: &mut dyn StrategyContext, response: &mut Response) -> Result<()> {
        response.request_mut().meta.state = Some(UrlState::Crawled);
        self.crawled += 1;
        Ok(())
    }

    fn links_extracted(
        &mut self,
        ctx: &mut dyn StrategyContext,
        _request: &Request,
        links: &mut [Request],
    ) -> Result<()> {
        Self::schedule_new(ctx, links, Self::LINK_SCORE)?;
        Ok(())
    }

    fn page_error(
        &mut self,
        _ctx: &mut dyn StrategyContext,
        request: &mut Request,
        error: &str,
    ) -> Result<()> {
        tracing::debug!(url = %request.url, error, "Page error");
        request.meta.state = Some(UrlState::Error);
        self.errors += 1;
        Ok(())
    }

    fn finished(&self) -> bool {
        self.max_pages
            .is_some_and(|max| self.crawled + self.errors >= max)
    }
}

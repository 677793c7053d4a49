//! Backpressure for overloaded slots
//!
//! When the downloader reports a slot as overused, requests for that slot are
//! parked here instead of being handed out. They are replayed, in their
//! original order, on the first call that sees the slot free again.

use crate::model::{Request, Response};
use crate::storage::{Backend, RequestSource, StorageResult};
use crate::url::{DownloaderInfo, SlotResolver};
use std::collections::{HashMap, HashSet, VecDeque};

/// Request source wrapper that defers requests for overused slots
pub struct OverusedBuffer<S> {
    source: S,
    resolver: SlotResolver,
    pending: HashMap<String, VecDeque<Request>>,
    /// Slot keys in the order they first received a deferred request
    order: Vec<String>,
}

impl<S> OverusedBuffer<S> {
    pub fn new(source: S) -> Self {
        Self::with_resolver(source, SlotResolver::default())
    }

    pub fn with_resolver(source: S, resolver: SlotResolver) -> Self {
        Self {
            source,
            resolver,
            pending: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Number of deferred requests across all slots
    pub fn pending_count(&self) -> usize {
        self.pending.values().map(VecDeque::len).sum()
    }

    /// Number of deferred requests for one slot
    pub fn pending_for(&self, key: &str) -> usize {
        self.pending.get(key).map_or(0, VecDeque::len)
    }

    pub fn inner(&self) -> &S {
        &self.source
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Removes every deferred request, slot by slot in arrival order
    pub fn take_deferred(&mut self) -> Vec<Request> {
        let mut pending = std::mem::take(&mut self.pending);
        std::mem::take(&mut self.order)
            .into_iter()
            .filter_map(|key| pending.remove(&key))
            .flatten()
            .collect()
    }

    fn defer(&mut self, key: String, request: Request) {
        match self.pending.get_mut(&key) {
            Some(queue) => queue.push_back(request),
            None => {
                self.order.push(key.clone());
                self.pending.insert(key, VecDeque::from([request]));
            }
        }
    }

    /// Takes up to `limit` deferred requests from free slots, one per slot
    /// per round
    fn drain_pending(&mut self, limit: usize, overused: &HashSet<&str>) -> Vec<Request> {
        let mut requests = Vec::new();

        while requests.len() < limit {
            let mut progressed = false;
            for key in &self.order {
                if requests.len() >= limit {
                    break;
                }
                if overused.contains(key.as_str()) {
                    continue;
                }
                if let Some(request) = self.pending.get_mut(key).and_then(VecDeque::pop_front) {
                    requests.push(request);
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }

        self.pending.retain(|_, queue| !queue.is_empty());
        let pending = &self.pending;
        self.order.retain(|key| pending.contains_key(key));
        requests
    }
}

impl<S: RequestSource> RequestSource for OverusedBuffer<S> {
    async fn get_next_requests(
        &mut self,
        max_n: usize,
        info: &DownloaderInfo,
    ) -> StorageResult<Vec<Request>> {
        tracing::debug!(overused = ?info.overused_keys, pending = self.pending_count(), "Overused buffer state");

        let overused: HashSet<&str> = info.overused_keys.iter().map(String::as_str).collect();
        let limit = if max_n == 0 { usize::MAX } else { max_n };

        let mut requests = self.drain_pending(limit, &overused);
        if requests.len() >= limit {
            return Ok(requests);
        }

        let wanted = if max_n == 0 { 0 } else { max_n - requests.len() };
        let fresh = self.source.get_next_requests(wanted, info).await?;
        for request in fresh {
            let key = self.resolver.slot_key(&request, info.key_type).await;
            if overused.contains(key.as_str()) {
                self.defer(key, request);
            } else {
                requests.push(request);
            }
        }

        Ok(requests)
    }
}

impl<S: Backend> Backend for OverusedBuffer<S> {
    async fn start(&mut self) -> StorageResult<()> {
        self.source.start().await
    }

    /// Deferred requests are already QUEUED upstream and stay that way; each
    /// one is logged so it can be requeued by hand.
    async fn stop(&mut self) -> StorageResult<()> {
        let deferred = self.take_deferred();
        if !deferred.is_empty() {
            tracing::warn!(count = deferred.len(), "Stopping with deferred requests");
            for request in &deferred {
                tracing::warn!(fingerprint = %request.fingerprint(), url = %request.url, "Deferred request left QUEUED");
            }
        }
        self.source.stop().await
    }

    async fn add_seeds(&mut self, seeds: &[Request]) -> StorageResult<()> {
        self.source.add_seeds(seeds).await
    }

    async fn page_crawled(&mut self, response: &Response, links: &[Request]) -> StorageResult<()> {
        self.source.page_crawled(response, links).await
    }

    async fn links_extracted(&mut self, request: &Request, links: &[Request]) -> StorageResult<()> {
        self.source.links_extracted(request, links).await
    }

    async fn request_error(&mut self, request: &Request, error: &str) -> StorageResult<()> {
        self.source.request_error(request, error).await
    }

    fn finished(&self) -> bool {
        self.pending.is_empty() && self.source.finished()
    }
}

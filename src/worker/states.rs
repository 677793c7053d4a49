//! State and score plumbing handed to crawling strategies

use crate::bus::Producer;
use crate::codec::{Encoder, JsonCodec};
use crate::model::Request;
use crate::state::UrlState;
use crate::storage::{StateEntry, StateStore, StorageResult};
use std::collections::{HashMap, HashSet};

/// Per-cycle cache of URL states
///
/// Strategies see the persisted state of every request they are handed. The
/// states they leave behind are written back in one batch on [`release`],
/// including states of URLs the store has never seen.
///
/// [`release`]: StatesContext::release
pub struct StatesContext<S> {
    store: S,
    states: HashMap<String, StateEntry>,
}

impl<S: StateStore> StatesContext<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            states: HashMap::new(),
        }
    }

    /// Attaches current states to `requests`, fetching the ones not cached
    ///
    /// Fingerprints the store does not know yet are treated as NOT_CRAWLED.
    pub fn refresh_and_keep(&mut self, requests: &mut [Request]) -> StorageResult<()> {
        let mut seen = HashSet::new();
        let missing: Vec<&Request> = requests
            .iter()
            .filter(|r| !self.states.contains_key(r.fingerprint()) && seen.insert(r.fingerprint()))
            .collect();

        if !missing.is_empty() {
            let fingerprints: Vec<String> =
                missing.iter().map(|r| r.fingerprint().to_string()).collect();
            let fetched = self.store.fetch_states(&fingerprints)?;
            tracing::trace!(requested = missing.len(), found = fetched.len(), "Fetched states");
            for request in missing {
                let state = fetched
                    .get(request.fingerprint())
                    .copied()
                    .unwrap_or(UrlState::NotCrawled);
                self.states.insert(
                    request.fingerprint().to_string(),
                    StateEntry {
                        url: request.url.clone(),
                        state,
                    },
                );
            }
        }

        for request in requests.iter_mut() {
            request.meta.state = self.get(request.fingerprint());
        }
        Ok(())
    }

    /// Takes back the states a strategy left on `requests`
    ///
    /// A cached state is only replaced by one further along the life-cycle.
    pub fn update_cache<'a>(&mut self, requests: impl IntoIterator<Item = &'a Request>) {
        for request in requests {
            let Some(state) = request.state() else {
                continue;
            };
            self.states
                .entry(request.fingerprint().to_string())
                .and_modify(|current| {
                    if current.state.can_transition_to(state) {
                        current.state = state;
                    }
                })
                .or_insert_with(|| StateEntry {
                    url: request.url.clone(),
                    state,
                });
        }
    }

    /// Cached state of one fingerprint
    pub fn get(&self, fingerprint: &str) -> Option<UrlState> {
        self.states.get(fingerprint).map(|entry| entry.state)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Writes cached states back to the store and empties the cache
    pub fn release(&mut self) -> StorageResult<()> {
        if self.states.is_empty() {
            return Ok(());
        }
        self.store.flush_states(&self.states)?;
        tracing::debug!(count = self.states.len(), "Released states");
        self.states.clear();
        Ok(())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
}

/// Scoring-log producer used by strategies to schedule URLs
pub struct ScoringStream<P> {
    producer: P,
    codec: JsonCodec,
    sent: usize,
}

impl<P: Producer> ScoringStream<P> {
    pub fn new(producer: P) -> Self {
        Self {
            producer,
            codec: JsonCodec::default(),
            sent: 0,
        }
    }

    /// Queues a score update; `dont_queue` keeps the URL out of the fetch
    /// queue while still recording the score
    pub fn send(&mut self, request: &Request, score: f64, dont_queue: bool) -> crate::Result<()> {
        let message = self.codec.encode_update_score(
            request.fingerprint(),
            Some(score),
            &request.url,
            !dont_queue,
        )?;
        self.producer.send(None, message)?;
        self.sent += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> crate::Result<()> {
        self.producer.flush()?;
        Ok(())
    }

    /// Number of updates sent since creation
    pub fn sent(&self) -> usize {
        self.sent
    }
}

use crate::model::{Request, Response};
use crate::storage::Backend;
use crate::url::DownloaderInfo;
use crate::{FrontierError, Result};
use std::borrow::Cow;

/// Single-process frontier
///
/// Drives the request life-cycle against one backend. Every request entering
/// the frontier gets its fingerprint and domain metadata filled in here, so
/// backends can rely on them.
pub struct FrontierManager<B> {
    backend: B,
    max_next_requests: usize,
    max_requests: usize,
    n_requests: usize,
    iteration: usize,
    running: bool,
}

impl<B: Backend> FrontierManager<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            max_next_requests: 64,
            max_requests: 0,
            n_requests: 0,
            iteration: 0,
            running: false,
        }
    }

    /// Batch size used when a caller asks for `0` requests
    pub fn with_max_next_requests(mut self, max_next_requests: usize) -> Self {
        self.max_next_requests = max_next_requests;
        self
    }

    /// Stop handing out requests after this many; `0` means no limit
    pub fn with_max_requests(mut self, max_requests: usize) -> Self {
        self.max_requests = max_requests;
        self
    }

    pub async fn start(&mut self) -> Result<()> {
        self.backend.start().await?;
        self.running = true;
        tracing::info!(
            max_next_requests = self.max_next_requests,
            max_requests = self.max_requests,
            "Frontier started"
        );
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        self.running = false;
        self.backend.stop().await?;
        tracing::info!(
            requests = self.n_requests,
            iterations = self.iteration,
            "Frontier stopped"
        );
        Ok(())
    }

    pub async fn add_seeds(&mut self, mut seeds: Vec<Request>) -> Result<()> {
        self.ensure_running()?;
        seeds.iter_mut().for_each(Request::ensure_meta);
        tracing::debug!(count = seeds.len(), "Adding seeds");
        self.backend.add_seeds(&seeds).await?;
        Ok(())
    }

    /// Returns the next batch
    ///
    /// `max_n == 0` falls back to the configured batch size. The batch is
    /// further capped by the remaining request allowance, and is empty once
    /// the frontier is finished.
    pub async fn get_next_requests(
        &mut self,
        max_n: usize,
        info: &DownloaderInfo,
    ) -> Result<Vec<Request>> {
        self.ensure_running()?;
        if self.finished() {
            return Ok(Vec::new());
        }

        let mut wanted = if max_n == 0 {
            self.max_next_requests
        } else {
            max_n
        };
        if self.max_requests > 0 {
            let remaining = self.max_requests - self.n_requests;
            wanted = if wanted == 0 {
                remaining
            } else {
                wanted.min(remaining)
            };
        }

        let requests = self.backend.get_next_requests(wanted, info).await?;
        self.iteration += 1;
        self.n_requests += requests.len();
        tracing::debug!(
            iteration = self.iteration,
            count = requests.len(),
            total = self.n_requests,
            "Handed out requests"
        );
        Ok(requests)
    }

    pub async fn page_crawled(&mut self, response: &Response, mut links: Vec<Request>) -> Result<()> {
        self.ensure_running()?;
        links.iter_mut().for_each(Request::ensure_meta);
        let response = response_with_meta(response);
        self.backend.page_crawled(&response, &links).await?;
        Ok(())
    }

    pub async fn links_extracted(&mut self, request: &Request, mut links: Vec<Request>) -> Result<()> {
        self.ensure_running()?;
        links.iter_mut().for_each(Request::ensure_meta);
        let request = with_meta(request);
        self.backend.links_extracted(&request, &links).await?;
        Ok(())
    }

    pub async fn request_error(&mut self, request: &Request, error: &str) -> Result<()> {
        self.ensure_running()?;
        let request = with_meta(request);
        self.backend.request_error(&request, error).await?;
        Ok(())
    }

    /// True once the request allowance is spent or the backend is exhausted
    pub fn finished(&self) -> bool {
        (self.max_requests > 0 && self.n_requests >= self.max_requests) || self.backend.finished()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Number of `get_next_requests` calls served
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Number of requests handed out so far
    pub fn n_requests(&self) -> usize {
        self.n_requests
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn ensure_running(&self) -> Result<()> {
        if self.running {
            Ok(())
        } else {
            Err(FrontierError::NotRunning)
        }
    }
}

fn with_meta(request: &Request) -> Cow<'_, Request> {
    if request.has_meta() {
        return Cow::Borrowed(request);
    }
    let mut request = request.clone();
    request.ensure_meta();
    Cow::Owned(request)
}

fn response_with_meta(response: &Response) -> Cow<'_, Response> {
    if response.request.has_meta() {
        return Cow::Borrowed(response);
    }
    let mut response = response.clone();
    response.request_mut().ensure_meta();
    Cow::Owned(response)
}

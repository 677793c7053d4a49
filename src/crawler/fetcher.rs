//! HTTP fetcher for the embedded downloader
//!
//! Failures are not errors here: they are classified into the error codes the
//! frontier stores on a record (`DNS_ERROR`, `TIMEOUT_ERROR`, `CONNECT_ERROR`,
//! `HTTP_<status>`, `FETCH_ERROR`).

use crate::config::CrawlerConfig;
use crate::model::{Request, Response};
use reqwest::{redirect::Policy, Client};
use std::error::Error as _;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of fetching one request
#[derive(Debug)]
pub enum FetchOutcome {
    /// The server answered with a success status
    Fetched {
        response: Response,
        /// Page body, when the server declared HTML
        html: Option<String>,
    },

    /// The fetch failed; `error` is the code reported to the frontier
    Failed { request: Request, error: String },
}

/// Builds the HTTP client used by the downloader
///
/// # Arguments
///
/// * `config` - Downloader configuration (user agent and timeout)
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &CrawlerConfig) -> Result<Client, reqwest::Error> {
    let timeout = config.request_timeout();
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches a request and classifies the result
pub async fn fetch(client: &Client, request: Request) -> FetchOutcome {
    let response = match client.get(&request.url).send().await {
        Ok(response) => response,
        Err(e) => return failed(request, &e),
    };

    let status = response.status();
    if !status.is_success() {
        return FetchOutcome::Failed {
            request,
            error: format!("HTTP_{}", status.as_u16()),
        };
    }

    let final_url = response.url().to_string();
    let is_html = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("text/html") || ct.contains("application/xhtml"));

    let body = match response.bytes().await {
        Ok(body) => body,
        Err(e) => return failed(request, &e),
    };

    let html = is_html.then(|| String::from_utf8_lossy(&body).into_owned());
    let response = Response::new(final_url, status.as_u16(), Arc::new(request)).with_body(body.to_vec());
    FetchOutcome::Fetched { response, html }
}

fn failed(request: Request, error: &reqwest::Error) -> FetchOutcome {
    let code = classify_error(error);
    tracing::debug!(url = %request.url, error = %error, code, "Fetch failed");
    FetchOutcome::Failed {
        request,
        error: code.to_string(),
    }
}

/// Maps a transport error to a frontier error code
pub fn classify_error(error: &reqwest::Error) -> &'static str {
    if error.is_timeout() {
        return "TIMEOUT_ERROR";
    }
    if error.is_connect() {
        if is_dns_failure(error) {
            return "DNS_ERROR";
        }
        return "CONNECT_ERROR";
    }
    "FETCH_ERROR"
}

fn is_dns_failure(error: &reqwest::Error) -> bool {
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string().to_lowercase();
        if text.contains("dns error")
            || text.contains("failed to lookup address")
            || text.contains("name or service not known")
        {
            return true;
        }
        source = cause.source();
    }
    false
}

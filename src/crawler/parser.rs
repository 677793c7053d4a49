//! Link extraction for the embedded downloader

use crate::model::Request;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Extracts followable links from an HTML page
///
/// Links come from `<a href>` and `<link rel="canonical">`. They are made
/// absolute against `base_url`, stripped of fragments and deduplicated in
/// document order. Non-http(s) targets, `download` anchors and links back to
/// the page itself are dropped.
///
/// # Arguments
///
/// * `html` - The page body
/// * `base_url` - URL the page was fetched from
///
/// # Example
///
/// ```
/// use ripple_frontier::crawler::extract_links;
/// use url::Url;
///
/// let html = r#"<a href="/next#top">next</a><a href="mailto:x@y.z">mail</a>"#;
/// let base = Url::parse("http://example.com/start").unwrap();
/// assert_eq!(extract_links(html, &base), vec!["http://example.com/next"]);
/// ```
pub fn extract_links(html: &str, base_url: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    let mut page = base_url.clone();
    page.set_fragment(None);
    seen.insert(page.to_string());

    let anchors = Selector::parse("a[href]").ok();
    let canonical = Selector::parse("link[rel='canonical'][href]").ok();

    for selector in [anchors, canonical].iter().flatten() {
        for element in document.select(selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            if let Some(link) = resolve_link(href, base_url) {
                if seen.insert(link.clone()) {
                    links.push(link);
                }
            }
        }
    }

    links
}

/// Turns extracted links into requests with metadata filled in
pub fn links_to_requests(links: Vec<String>) -> Vec<Request> {
    links.into_iter().map(Request::new).collect()
}

fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let mut url = base_url.join(href).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

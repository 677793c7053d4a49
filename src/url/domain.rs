use crate::model::Request;
use crate::url::KeyType;
use crate::{UrlError, UrlResult};
use moka::sync::Cache;
use std::time::Duration;
use url::Url;

/// Extracts the host from a URL string
///
/// The host is lowercased. Returns None if the URL does not parse or has no
/// host component.
///
/// # Examples
///
/// ```
/// use ripple_frontier::url::extract_host;
///
/// assert_eq!(extract_host("https://EXAMPLE.COM/path"), Some("example.com".to_string()));
/// assert_eq!(extract_host("https://sub.example.com:8080/"), Some("sub.example.com".to_string()));
/// assert_eq!(extract_host("not a url"), None);
/// ```
pub fn extract_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// Resolves a host to its first address
///
/// IP literals resolve to themselves without touching DNS.
pub async fn resolve_host(host: &str) -> UrlResult<String> {
    let mut addrs = tokio::net::lookup_host((host, 80))
        .await
        .map_err(|e| UrlError::Resolve {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

    addrs
        .next()
        .map(|addr| addr.ip().to_string())
        .ok_or_else(|| UrlError::Resolve {
            host: host.to_string(),
            reason: "no addresses returned".to_string(),
        })
}

/// Computes the slot key for a request
///
/// The slot key is the hostname when `key_type` is [`KeyType::Domain`] and the
/// first resolved address of that hostname when it is [`KeyType::Ip`]. A URL
/// without a host has the empty slot key.
pub async fn slot_key(request: &Request, key_type: KeyType) -> UrlResult<String> {
    let host = extract_host(&request.url).unwrap_or_default();
    match key_type {
        KeyType::Domain => Ok(host),
        KeyType::Ip if host.is_empty() => Ok(host),
        KeyType::Ip => resolve_host(&host).await,
    }
}

/// Slot key lookup with a time-bounded cache for IP resolution
///
/// Resolved addresses are kept for `ttl`. When a host cannot be resolved the
/// hostname itself is used as the slot key.
#[derive(Clone)]
pub struct SlotResolver {
    cache: Cache<String, String>,
}

impl SlotResolver {
    /// Creates a resolver whose cached addresses expire after `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Returns the slot key for `request`, resolving and caching IPs as needed
    pub async fn slot_key(&self, request: &Request, key_type: KeyType) -> String {
        let host = extract_host(&request.url).unwrap_or_default();
        if key_type == KeyType::Domain || host.is_empty() {
            return host;
        }

        if let Some(ip) = self.cache.get(&host) {
            return ip;
        }

        match resolve_host(&host).await {
            Ok(ip) => {
                self.cache.insert(host, ip.clone());
                ip
            }
            Err(e) => {
                tracing::debug!(%host, error = %e, "Falling back to hostname as slot key");
                host
            }
        }
    }

    /// Number of cached host addresses
    pub fn cached_entries(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }
}

impl Default for SlotResolver {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

use sha2::{Digest, Sha256};
use url::Url;

/// Computes the fingerprint of a URL
///
/// The fingerprint is the hex-encoded SHA-256 of the URL as serialized by the
/// `url` crate, so trivially different spellings of the same URL (host case,
/// missing root slash) collapse onto one record. Unparseable input is hashed
/// verbatim; the frontier never rejects a request because of its URL.
///
/// # Examples
///
/// ```
/// use ripple_frontier::url::url_fingerprint;
///
/// assert_eq!(url_fingerprint("http://EXAMPLE.com"), url_fingerprint("http://example.com/"));
/// assert_eq!(url_fingerprint("http://example.com/").len(), 64);
/// ```
pub fn url_fingerprint(url: &str) -> String {
    let canonical = match Url::parse(url.trim()) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => url.trim().to_string(),
    };
    sha256_hex(canonical.as_bytes())
}

/// Computes the fingerprint of a host name
///
/// Used as the partition key for spider-log messages about that host.
pub fn domain_fingerprint(host: &str) -> String {
    sha256_hex(host.to_lowercase().as_bytes())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

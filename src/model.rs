//! Request/response model shared by every frontier component
//!
//! Requests are values: once a request is placed on the bus nothing mutates
//! it except the component that owns state transitions, which attaches
//! `meta.state`. Every other component echoes the metadata back unchanged.

use crate::state::UrlState;
use crate::url::{domain_fingerprint, extract_host, url_fingerprint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Host information used as the partition and slot key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainInfo {
    pub name: String,
    pub fingerprint: String,
}

impl DomainInfo {
    /// Builds domain info for a host name
    pub fn from_host(host: &str) -> Self {
        Self {
            name: host.to_lowercase(),
            fingerprint: domain_fingerprint(host),
        }
    }
}

/// Structured request metadata
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RequestMeta {
    /// Stable content address of the URL; primary key of the URL record
    pub fingerprint: String,

    /// Host of the URL, absent when the URL has no host
    pub domain: Option<DomainInfo>,

    /// Current persisted state, attached by the strategy worker
    pub state: Option<UrlState>,

    /// Priority score assigned by a crawling strategy
    pub score: Option<f64>,
}

/// A URL to be fetched, along with everything needed to fetch it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    #[serde(with = "hex_bytes")]
    pub body: Vec<u8>,
    pub meta: RequestMeta,
}

impl Request {
    /// Creates a GET request with fingerprint and domain metadata filled in
    pub fn new(url: impl Into<String>) -> Self {
        RequestBuilder::new(url).build()
    }

    /// The URL fingerprint
    pub fn fingerprint(&self) -> &str {
        &self.meta.fingerprint
    }

    /// Fingerprint of the URL's host, used as the spider-log partition key
    pub fn domain_fingerprint(&self) -> Option<&str> {
        self.meta.domain.as_ref().map(|d| d.fingerprint.as_str())
    }

    /// State attached by the strategy worker, if any
    pub fn state(&self) -> Option<UrlState> {
        self.meta.state
    }

    /// True when both fingerprint and domain metadata are present
    pub fn has_meta(&self) -> bool {
        !self.meta.fingerprint.is_empty() && self.meta.domain.is_some()
    }

    /// Fills in fingerprint and domain metadata when they are missing
    ///
    /// Requests arriving from a scraping framework usually carry no metadata;
    /// requests that already have it are left untouched.
    pub fn ensure_meta(&mut self) {
        if self.meta.fingerprint.is_empty() {
            self.meta.fingerprint = url_fingerprint(&self.url);
        }
        if self.meta.domain.is_none() {
            self.meta.domain = extract_host(&self.url).map(|host| DomainInfo::from_host(&host));
        }
    }
}

/// Builder for [`Request`] values
///
/// `build` always leaves the request with a fingerprint and, when the URL has
/// a host, domain info.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            request: Request {
                url: url.into(),
                method: "GET".to_string(),
                headers: BTreeMap::new(),
                cookies: BTreeMap::new(),
                body: Vec::new(),
                meta: RequestMeta::default(),
            },
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.request.method = method.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.insert(name.into(), value.into());
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.cookies.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.request.body = body.into();
        self
    }

    pub fn meta(mut self, meta: RequestMeta) -> Self {
        self.request.meta = meta;
        self
    }

    pub fn state(mut self, state: UrlState) -> Self {
        self.request.meta.state = Some(state);
        self
    }

    pub fn score(mut self, score: f64) -> Self {
        self.request.meta.score = Some(score);
        self
    }

    pub fn build(mut self) -> Request {
        self.request.ensure_meta();
        self.request
    }
}

/// The outcome of fetching a request
///
/// The originating request is shared with whoever still holds it; the
/// response does not outlive the processing of its event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub url: String,
    pub status_code: u16,
    #[serde(with = "hex_bytes_opt")]
    pub body: Option<Vec<u8>>,
    pub request: Arc<Request>,
}

impl Response {
    pub fn new(url: impl Into<String>, status_code: u16, request: Arc<Request>) -> Self {
        Self {
            url: url.into(),
            status_code,
            body: None,
            request,
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Metadata of the originating request
    pub fn meta(&self) -> &RequestMeta {
        &self.request.meta
    }

    /// Fingerprint of the originating request
    pub fn fingerprint(&self) -> &str {
        self.request.fingerprint()
    }

    /// Mutable access to the originating request, cloning it if shared
    pub fn request_mut(&mut self) -> &mut Request {
        Arc::make_mut(&mut self.request)
    }
}

/// Serializes byte buffers as hex strings so payloads stay inspectable
mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(encoded).map_err(D::Error::custom)
    }
}

mod hex_bytes_opt {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| hex::decode(encoded).map_err(D::Error::custom))
            .transpose()
    }
}

//! Wire codec for crawl events
//!
//! Every message on the spider log and scoring log is an [`Event`]: a type
//! tag plus typed fields. The spider feed carries bare requests and is decoded
//! with [`Decoder::decode_request`].

mod json;

pub use json::JsonCodec;

use crate::model::{Request, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while encoding or decoding payloads
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected event on this stream: {0}")]
    UnexpectedEvent(&'static str),
}

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// A decoded crawl event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    AddSeeds {
        seeds: Vec<Request>,
    },
    PageCrawled {
        response: Response,
        links: Vec<Request>,
    },
    LinksExtracted {
        request: Request,
        links: Vec<Request>,
    },
    RequestError {
        request: Request,
        error: String,
    },
    UpdateScore {
        fingerprint: String,
        score: Option<f64>,
        url: String,
        schedule: bool,
    },
    NewJobId {
        job_id: u64,
    },
    Offset {
        partition_id: u32,
        offset: u64,
    },
}

impl Event {
    /// The wire type tag of this event
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::AddSeeds { .. } => "add_seeds",
            Self::PageCrawled { .. } => "page_crawled",
            Self::LinksExtracted { .. } => "links_extracted",
            Self::RequestError { .. } => "request_error",
            Self::UpdateScore { .. } => "update_score",
            Self::NewJobId { .. } => "new_job_id",
            Self::Offset { .. } => "offset",
        }
    }
}

/// Turns domain events into bus payloads
pub trait Encoder {
    fn encode_add_seeds(&self, seeds: &[Request]) -> CodecResult<Vec<u8>>;

    /// Encodes a crawled page; the body is only included when the codec was
    /// built to carry content
    fn encode_page_crawled(&self, response: &Response, links: &[Request]) -> CodecResult<Vec<u8>>;

    fn encode_links_extracted(&self, request: &Request, links: &[Request])
        -> CodecResult<Vec<u8>>;

    fn encode_request_error(&self, request: &Request, error: &str) -> CodecResult<Vec<u8>>;

    /// Encodes a bare request for the spider feed
    fn encode_request(&self, request: &Request) -> CodecResult<Vec<u8>>;

    fn encode_update_score(
        &self,
        fingerprint: &str,
        score: Option<f64>,
        url: &str,
        schedule: bool,
    ) -> CodecResult<Vec<u8>>;

    fn encode_new_job_id(&self, job_id: u64) -> CodecResult<Vec<u8>>;

    fn encode_offset(&self, partition_id: u32, offset: u64) -> CodecResult<Vec<u8>>;
}

/// Turns bus payloads back into domain events
pub trait Decoder {
    fn decode(&self, buffer: &[u8]) -> CodecResult<Event>;

    /// Decodes a spider-feed payload, which carries no type tag
    fn decode_request(&self, buffer: &[u8]) -> CodecResult<Request>;
}

use crate::codec::{CodecResult, Decoder, Encoder, Event};
use crate::model::{Request, Response};
use serde::Serialize;
use std::borrow::Cow;
use std::sync::Arc;

/// Borrowed mirror of [`Event`] so encoding never clones request lists
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum EventRef<'a> {
    AddSeeds {
        seeds: &'a [Request],
    },
    PageCrawled {
        response: Cow<'a, Response>,
        links: &'a [Request],
    },
    LinksExtracted {
        request: &'a Request,
        links: &'a [Request],
    },
    RequestError {
        request: &'a Request,
        error: &'a str,
    },
    UpdateScore {
        fingerprint: &'a str,
        score: Option<f64>,
        url: &'a str,
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

/// JSON codec for bus payloads
///
/// Byte buffers are carried as hex strings. Response bodies are dropped unless
/// the codec is built with `send_body`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    send_body: bool,
}

impl JsonCodec {
    pub fn new(send_body: bool) -> Self {
        Self { send_body }
    }

    pub fn sends_body(&self) -> bool {
        self.send_body
    }

    fn encode(&self, event: &EventRef<'_>) -> CodecResult<Vec<u8>> {
        Ok(serde_json::to_vec(event)?)
    }
}

impl Encoder for JsonCodec {
    fn encode_add_seeds(&self, seeds: &[Request]) -> CodecResult<Vec<u8>> {
        self.encode(&EventRef::AddSeeds { seeds })
    }

    fn encode_page_crawled(&self, response: &Response, links: &[Request]) -> CodecResult<Vec<u8>> {
        let response = if self.send_body || response.body.is_none() {
            Cow::Borrowed(response)
        } else {
            Cow::Owned(Response {
                url: response.url.clone(),
                status_code: response.status_code,
                body: None,
                request: Arc::clone(&response.request),
            })
        };
        self.encode(&EventRef::PageCrawled { response, links })
    }

    fn encode_links_extracted(
        &self,
        request: &Request,
        links: &[Request],
    ) -> CodecResult<Vec<u8>> {
        self.encode(&EventRef::LinksExtracted { request, links })
    }

    fn encode_request_error(&self, request: &Request, error: &str) -> CodecResult<Vec<u8>> {
        self.encode(&EventRef::RequestError { request, error })
    }

    fn encode_request(&self, request: &Request) -> CodecResult<Vec<u8>> {
        Ok(serde_json::to_vec(request)?)
    }

    fn encode_update_score(
        &self,
        fingerprint: &str,
        score: Option<f64>,
        url: &str,
        schedule: bool,
    ) -> CodecResult<Vec<u8>> {
        self.encode(&EventRef::UpdateScore {
            fingerprint,
            score,
            url,
            schedule,
        })
    }

    fn encode_new_job_id(&self, job_id: u64) -> CodecResult<Vec<u8>> {
        self.encode(&EventRef::NewJobId { job_id })
    }

    fn encode_offset(&self, partition_id: u32, offset: u64) -> CodecResult<Vec<u8>> {
        self.encode(&EventRef::Offset {
            partition_id,
            offset,
        })
    }
}

impl Decoder for JsonCodec {
    fn decode(&self, buffer: &[u8]) -> CodecResult<Event> {
        Ok(serde_json::from_slice(buffer)?)
    }

    fn decode_request(&self, buffer: &[u8]) -> CodecResult<Request> {
        Ok(serde_json::from_slice(buffer)?)
    }
}

// ⚠️ Error Taxonomy - fetch, decode and division failures
//
// Every failure surfaces synchronously to the immediate caller.
// Nothing in this crate retries.

use crate::fetcher::Envelope;

// ============================================================================
// TRANSPORT
// ============================================================================

/// Failure below the envelope: the HTTP round trip itself did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Server answered with a non-2xx status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Connection, TLS or timeout failure inside the HTTP client
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
}

// ============================================================================
// FETCH
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Page number and page size must both be at least 1
    #[error("invalid page request: page {page_number}, size {page_size}")]
    InvalidPage { page_number: u32, page_size: u32 },

    /// `page_number * page_size` is past what the source will serve.
    /// Raised before any request is sent.
    #[error("capacity exceeded: offset {offset} > {capacity}")]
    CapacityExceeded { offset: u64, capacity: u64 },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// 2xx response whose body is not JSON
    #[error("response body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Envelope parsed but does not carry the success marker (or has no `data.list`)
    #[error("registry API error: status={}, message={}", .envelope.status, .envelope.message.as_deref().unwrap_or("<none>"))]
    Api { envelope: Envelope },
}

impl FetchError {
    /// The parsed envelope, when the failure came from the API layer
    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            FetchError::Api { envelope } => Some(envelope),
            _ => None,
        }
    }
}

// ============================================================================
// DIVISION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DivisionError {
    /// Prefix is not exactly six ASCII digits
    #[error("malformed division code: {0:?}")]
    MalformedCode(String),
}

// ============================================================================
// DECODE
// ============================================================================

/// Raw record could not be turned into a `Person`
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{0}` is not a string")]
    NotAString(&'static str),

    #[error("invalid listing date {value:?}: {source}")]
    InvalidDate {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("identifier code {0:?} is shorter than the 6-character division prefix")]
    ShortIdCode(String),

    #[error(transparent)]
    Division(#[from] DivisionError),
}

// ============================================================================
// STREAM
// ============================================================================

/// Item error of `RecordStream`
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error("page {page_number} could not be fetched: {source}")]
    Fetch {
        page_number: u32,
        #[source]
        source: FetchError,
    },

    #[error("record {offset} on page {page_number} could not be decoded: {source}")]
    Decode {
        page_number: u32,
        offset: usize,
        #[source]
        source: DecodeError,
    },
}

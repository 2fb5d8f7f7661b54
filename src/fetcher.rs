// 📄 Paged Fetcher - bounded page requests against the registry endpoint
//
// One call = one page = exactly one network round trip (or zero, when the
// request is rejected before it leaves the process).

use crate::error::FetchError;
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Highest record offset (`page_number * page_size`) the source serves
pub const CAPACITY: u64 = 10_000;

/// `message` value of a successful envelope
pub const SUCCESS_MESSAGE: &str = "成功";

/// One raw record as found in `data.list`. Decoding happens in `Person::from_raw`.
pub type RawRecord = Value;

// ============================================================================
// ENDPOINT SETTINGS
// ============================================================================

/// Fixed part of the request contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSettings {
    pub base_url: String,
    pub endpoint: String,
    pub table_name: String,
    pub scenes: String,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        EndpointSettings {
            base_url: "https://public.creditchina.gov.cn".to_string(),
            endpoint: "/private-api/catalogSearch".to_string(),
            table_name: "credit_zgf_zrr_sxbzxr".to_string(),
            scenes: "defaultscenario".to_string(),
        }
    }
}

impl EndpointSettings {
    pub fn url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.endpoint.trim_start_matches('/')
        )
    }

    /// Query parameters for one page, in wire order
    pub fn query(&self, page_number: u32, page_size: u32) -> Vec<(&'static str, String)> {
        vec![
            ("searchState", "1".to_string()),
            ("page", page_number.to_string()),
            ("pageSize", page_size.to_string()),
            ("tableName", self.table_name.clone()),
            ("scenes", self.scenes.clone()),
        ]
    }
}

// ============================================================================
// ENVELOPE
// ============================================================================

/// Top-level response wrapper: `{status, message, data: {list: [...]}}`
///
/// `body` keeps the whole parsed document so callers can inspect fields this
/// crate does not model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub status: Value,
    pub message: Option<String>,
    pub body: Value,
}

impl Envelope {
    pub fn from_value(body: Value) -> Self {
        let status = body.get("status").cloned().unwrap_or(Value::Null);
        let message = body
            .get("message")
            .and_then(|m| m.as_str())
            .map(|m| m.to_string());

        Envelope {
            status,
            message,
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        self.message.as_deref() == Some(SUCCESS_MESSAGE)
    }

    /// `data.list`, if present and an array
    pub fn list(&self) -> Option<&Vec<Value>> {
        self.body
            .get("data")
            .and_then(|d| d.get("list"))
            .and_then(|l| l.as_array())
    }
}

// ============================================================================
// PAGE REQUEST CHECK
// ============================================================================

/// Validate a page request without touching the network.
///
/// Returns the record offset `page_number * page_size` when the request is
/// within capacity. The product is computed in `u64`, so it cannot overflow.
pub fn check_page_request(page_number: u32, page_size: u32) -> Result<u64, FetchError> {
    if page_number == 0 || page_size == 0 {
        return Err(FetchError::InvalidPage {
            page_number,
            page_size,
        });
    }

    let offset = u64::from(page_number) * u64::from(page_size);
    if offset > CAPACITY {
        return Err(FetchError::CapacityExceeded {
            offset,
            capacity: CAPACITY,
        });
    }

    Ok(offset)
}

// ============================================================================
// PAGED FETCHER
// ============================================================================

/// Issues page requests through an owned transport.
///
/// No caching, retry or rate limiting: callers that want those wrap the
/// fetcher, the contract of `fetch_page` stays the same.
#[derive(Debug)]
pub struct PagedFetcher<T: Transport> {
    transport: T,
    settings: EndpointSettings,
}

impl<T: Transport> PagedFetcher<T> {
    pub fn new(transport: T, settings: EndpointSettings) -> Self {
        PagedFetcher {
            transport,
            settings,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetch one page and return exactly its `data.list`.
    ///
    /// # Errors
    /// * `InvalidPage` / `CapacityExceeded` - rejected before any request
    /// * `Transport` - the round trip failed, passed through unchanged
    /// * `InvalidJson` - 2xx body that does not parse
    /// * `Api` - envelope without the success marker or without `data.list`
    pub fn fetch_page(&self, page_number: u32, page_size: u32) -> Result<Vec<RawRecord>, FetchError> {
        let offset = check_page_request(page_number, page_size)?;

        let url = self.settings.url();
        let query = self.settings.query(page_number, page_size);

        debug!(page_number, page_size, offset, %url, "requesting registry page");
        let body = self.transport.get(&url, &query)?;

        let envelope = Envelope::from_value(serde_json::from_str(&body)?);

        if !envelope.is_success() {
            warn!(
                page_number,
                status = %envelope.status,
                message = envelope.message.as_deref().unwrap_or("<none>"),
                "registry API returned an error envelope"
            );
            return Err(FetchError::Api { envelope });
        }

        let records = match envelope.list() {
            Some(list) => list.clone(),
            None => {
                warn!(page_number, "success envelope without data.list");
                return Err(FetchError::Api { envelope });
            }
        };

        debug!(page_number, records = records.len(), "registry page received");
        Ok(records)
    }
}

// ============================================================================
// TESTS
// ============================================================================

// 🌐 Transport - the HTTP collaborator owned by PagedFetcher
//
// The fetcher never touches a global session: whoever builds the fetcher
// hands it a transport, and the transport is dropped with the fetcher.

use crate::error::TransportError;
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use std::time::Duration;

/// One GET round trip returning the raw response body.
///
/// Implementations must map non-2xx responses to `TransportError::Status`
/// and must not retry.
pub trait Transport {
    fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String, TransportError> {
        (**self).get(url, query)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String, TransportError> {
        (**self).get(url, query)
    }
}

// ============================================================================
// REQWEST IMPLEMENTATION
// ============================================================================

/// Blocking reqwest client with a fixed timeout and user agent
pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    /// Build a client with the given request timeout and user agent
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent.to_string())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { http })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String, TransportError> {
        let response = self
            .http
            .get(url)
            .query(query)
            .header("Accept", "application/json")
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        Ok(response.text()?)
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport").finish_non_exhaustive()
    }
}

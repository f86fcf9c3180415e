//! HTTP client for Moonraker
//!
//! Moonraker answers every request with a JSON envelope, including failed
//! ones, so the client returns the status and body as-is and leaves the
//! interpretation to the caller.

use async_trait::async_trait;
use bedleveler_core::ConnectionError;
use std::time::Duration;

/// Status and body of a completed HTTP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: String,
}

impl HttpReply {
    /// Create a reply
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// True for 2xx statuses
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Issues GET requests against a Moonraker host
#[async_trait]
pub trait MoonrakerClient: Send + Sync + 'static {
    /// Perform a GET request
    async fn get(&self, url: &str) -> Result<HttpReply, ConnectionError>;
}

/// `reqwest` implementation of [`MoonrakerClient`]
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Create a client with the given connect timeout.
    ///
    /// No overall request timeout is set: probing and homing can take
    /// minutes and Moonraker only answers once the G-code finished.
    pub fn new(connect_timeout: Duration) -> Result<Self, ConnectionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ConnectionError::InvalidParameters {
                reason: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MoonrakerClient for ReqwestClient {
    async fn get(&self, url: &str) -> Result<HttpReply, ConnectionError> {
        let response =
            self.client
                .get(url)
                .send()
                .await
                .map_err(|e| ConnectionError::HttpError {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ConnectionError::HttpError {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        tracing::trace!("Received {} from {}: {}", status, url, body);
        Ok(HttpReply { status, body })
    }
}

//! HTTP client abstraction for testability

use std::time::Duration;

use super::types::SourceError;

/// Default time allowed to establish a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default time allowed for the whole request after connecting.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_millis(5000);

/// Trait for HTTP client operations.
///
/// This abstraction allows for dependency injection and easier testing
/// by enabling mock HTTP clients in tests.
pub trait HttpClient: Send + Sync {
    /// Performs an HTTP GET request.
    ///
    /// # Arguments
    ///
    /// * `url` - The URL to request
    ///
    /// # Returns
    ///
    /// The response body as bytes or an error.
    fn get(&self, url: &str) -> Result<Vec<u8>, SourceError>;
}

/// Blocking HTTP client backed by reqwest.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Creates a client with the default 1s connect / 5s I/O timeouts.
    pub fn new() -> Result<Self, SourceError> {
        Self::with_timeouts(DEFAULT_CONNECT_TIMEOUT, DEFAULT_IO_TIMEOUT)
    }

    /// Creates a client with custom timeouts.
    pub fn with_timeouts(connect: Duration, io: Duration) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(connect)
            .timeout(connect + io)
            .user_agent(concat!("tilesupply/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        let response = self.client.get(url).send().map_err(|e| map_error(url, e))?;

        if !response.status().is_success() {
            return Err(SourceError::Http(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| map_error(url, e))
    }
}

fn map_error(url: &str, e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout(url.to_string())
    } else {
        SourceError::Http(format!("Request to {} failed: {}", url, e))
    }
}

//! Transfer configuration shared by every coordinator a caller creates.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use super::client::HttpClient;
use super::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_MAX_PARALLEL, DEFAULT_POLL_INTERVAL, MAX_PARALLEL, MIN_PARALLEL,
    READ_TIMEOUT_SECS,
};
use super::error::{DownloadError, TransferError};

/// Tunables for a transfer.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use mediafetch_core::download::TransferConfig;
///
/// let config = TransferConfig::default()
///     .with_max_parallel(4)
///     .with_poll_interval(Duration::from_millis(50))
///     .with_header("referer", "https://www.example.com")
///     .unwrap();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Number of parallel range tasks when the origin supports ranges.
    pub max_parallel: usize,
    /// How often the coordinator polls child snapshots.
    pub poll_interval: Duration,
    /// TCP/TLS connect timeout per request.
    pub connect_timeout: Duration,
    /// Timeout for each body read.
    pub read_timeout: Duration,
    /// Headers sent with every probe and range request.
    pub headers: HeaderMap,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            headers: HeaderMap::new(),
        }
    }
}

impl TransferConfig {
    /// Sets the parallelism.
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    /// Sets the supervision poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Sets both network timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    /// Adds a header sent with every request.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidHeader`] when the name or value is not a legal HTTP header.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, InvalidHeader> {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| InvalidHeader::new(name))?;
        let header_value = HeaderValue::from_str(value).map_err(|_| InvalidHeader::new(name))?;
        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidParallelism`] if `max_parallel` is
    /// outside `MIN_PARALLEL..=MAX_PARALLEL`.
    pub fn validate(&self) -> Result<(), TransferError> {
        if (MIN_PARALLEL..=MAX_PARALLEL).contains(&self.max_parallel) {
            Ok(())
        } else {
            Err(TransferError::InvalidParallelism {
                value: self.max_parallel,
            })
        }
    }

    /// Builds an HTTP client with these timeouts and headers.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Client`] if the client cannot be constructed.
    pub fn build_client(&self) -> Result<HttpClient, DownloadError> {
        HttpClient::build(self.connect_timeout, self.read_timeout, self.headers.clone())
    }
}

/// A header name or value that cannot be sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid HTTP header: {name}")]
pub struct InvalidHeader {
    /// The offending header name.
    pub name: String,
}

impl InvalidHeader {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

//! HTTP client wrapper for probing and streaming media resources.
//!
//! This module provides the `HttpClient` struct which issues the metadata-only
//! probe and the (optionally ranged) GET requests used by range tasks, with
//! connect/read timeouts and consistent error mapping.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, RANGE, USER_AGENT};
use reqwest::{Client, ClientBuilder, Response, StatusCode};
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use crate::user_agent;

/// HTTP client for probing and streaming downloads.
///
/// This client is designed to be created once and shared by every range task of
/// every transfer, taking advantage of connection pooling. Cloning is cheap.
///
/// # Example
///
/// ```no_run
/// use mediafetch_core::download::HttpClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new();
/// let response = client
///     .get("https://cdn.example.com/v.m4s", &Default::default(), Some("bytes=0-1023"))
///     .await?;
/// println!("status: {}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default timeouts.
    ///
    /// Default configuration:
    /// - Connect timeout: 10 seconds
    /// - Read timeout: 30 seconds per read (no whole-request deadline)
    /// - No transparent decompression, so byte offsets match the stored bytes
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a new HTTP client with explicit timeout values in seconds.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let client = base_client_builder(
            Duration::from_secs(connect_timeout_secs),
            Duration::from_secs(read_timeout_secs),
            HeaderMap::new(),
        )
        .build()
        .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Creates a client with explicit timeouts and headers sent on every request.
    ///
    /// A `User-Agent` in `default_headers` replaces the crate's own.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Client`] if the underlying client cannot be built.
    #[instrument(level = "debug", skip(default_headers))]
    pub fn build(
        connect_timeout: Duration,
        read_timeout: Duration,
        default_headers: HeaderMap,
    ) -> Result<Self, DownloadError> {
        let client = base_client_builder(connect_timeout, read_timeout, default_headers)
            .build()
            .map_err(|source| DownloadError::Client { source })?;
        Ok(Self { client })
    }

    /// Sends a metadata-only `HEAD` request.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` if:
    /// - The URL is invalid
    /// - The request fails (network error, timeout)
    /// - The server returns a non-2xx status
    #[instrument(skip(self, headers), fields(url = %url))]
    pub async fn head(&self, url: &str, headers: &HeaderMap) -> Result<Response, DownloadError> {
        validate_url(url)?;
        let response = self
            .client
            .head(url)
            .headers(headers.clone())
            .send()
            .await
            .map_err(|e| DownloadError::from_reqwest(url, e))?;
        check_status(url, response, false)
    }

    /// Sends a `GET`, optionally restricted by a `Range` header value.
    ///
    /// When a range is sent, `416 Range Not Satisfiable` is passed through to
    /// the caller instead of being mapped to an error, because a full-size
    /// partial file legitimately produces it.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`head`](Self::head).
    #[instrument(skip(self, headers), fields(url = %url))]
    pub async fn get(
        &self,
        url: &str,
        headers: &HeaderMap,
        range: Option<&str>,
    ) -> Result<Response, DownloadError> {
        validate_url(url)?;
        let mut request = self.client.get(url).headers(headers.clone());
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }
        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::from_reqwest(url, e))?;
        debug!(status = response.status().as_u16(), range, "response received");
        check_status(url, response, range.is_some())
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

fn validate_url(url: &str) -> Result<(), DownloadError> {
    let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
    if matches!(parsed.scheme(), "http" | "https") {
        Ok(())
    } else {
        Err(DownloadError::invalid_url(url))
    }
}

fn check_status(url: &str, response: Response, ranged: bool) -> Result<Response, DownloadError> {
    let status = response.status();
    if status.is_success() || (ranged && status == StatusCode::RANGE_NOT_SATISFIABLE) {
        Ok(response)
    } else {
        Err(DownloadError::http_status(url, status.as_u16()))
    }
}

fn base_client_builder(
    connect_timeout: Duration,
    read_timeout: Duration,
    mut default_headers: HeaderMap,
) -> ClientBuilder {
    if !default_headers.contains_key(USER_AGENT)
        && let Ok(value) = HeaderValue::from_str(&user_agent::default_download_user_agent())
    {
        default_headers.insert(USER_AGENT, value);
    }
    Client::builder()
        .connect_timeout(connect_timeout)
        .read_timeout(read_timeout)
        .default_headers(default_headers)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, ResponseTemplate};

    #[tokio::test]
    async fn test_get_success_returns_response() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/v.m4s"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"media bytes"))
            .mount(&mock_server)
            .await;

        let client = HttpClient::new();
        let url = format!("{}/v.m4s", mock_server.uri());
        let response = client.get(&url, &HeaderMap::new(), None).await.unwrap();
        assert_eq!(response.bytes().await.unwrap().as_ref(), b"media bytes");
    }

    #[tokio::test]
    async fn test_get_sends_range_header() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/v.m4s"))
            .and(header("range", "bytes=10-19"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"0123456789"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = HttpClient::new();
        let url = format!("{}/v.m4s", mock_server.uri());
        let response = client
            .get(&url, &HeaderMap::new(), Some("bytes=10-19"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    }

    #[tokio::test]
    async fn test_get_404_maps_to_http_status() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = HttpClient::new();
        let url = format!("{}/missing", mock_server.uri());
        match client.get(&url, &HeaderMap::new(), None).await {
            Err(DownloadError::HttpStatus { status, .. }) => assert_eq!(status, 404),
            other => panic!("Expected HttpStatus error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_416_passes_through_only_for_ranged_requests() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/done"))
            .respond_with(ResponseTemplate::new(416))
            .mount(&mock_server)
            .await;

        let client = HttpClient::new();
        let url = format!("{}/done", mock_server.uri());
        let ranged = client
            .get(&url, &HeaderMap::new(), Some("bytes=100-"))
            .await
            .unwrap();
        assert_eq!(ranged.status(), StatusCode::RANGE_NOT_SATISFIABLE);

        let plain = client.get(&url, &HeaderMap::new(), None).await;
        assert!(matches!(
            plain,
            Err(DownloadError::HttpStatus { status: 416, .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_url_rejected_before_request() {
        let client = HttpClient::new();
        let result = client.get("not-a-valid-url", &HeaderMap::new(), None).await;
        assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));

        let result = client.head("ftp://example.com/v", &HeaderMap::new()).await;
        assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));
    }

    #[test]
    fn test_timeout_client_still_rejects_invalid_url() {
        let client = HttpClient::new_with_timeouts(1, 1);
        let result = tokio_test::block_on(client.head("", &HeaderMap::new()));
        assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn test_default_headers_sent_and_user_agent_overridable() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/ref"))
            .and(header("referer", "https://www.example.com"))
            .and(header("user-agent", "custom-agent/1.0"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut headers = HeaderMap::new();
        headers.insert("referer", HeaderValue::from_static("https://www.example.com"));
        headers.insert(USER_AGENT, HeaderValue::from_static("custom-agent/1.0"));
        let client = HttpClient::build(
            Duration::from_secs(5),
            Duration::from_secs(5),
            headers,
        )
        .unwrap();

        let url = format!("{}/ref", mock_server.uri());
        client.get(&url, &HeaderMap::new(), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_default_user_agent_identifies_crate() {
        use wiremock::{Match, Request};

        struct CrateUaMatcher;

        impl Match for CrateUaMatcher {
            fn matches(&self, request: &Request) -> bool {
                request
                    .headers
                    .get("User-Agent")
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|ua| {
                        ua.starts_with("mediafetch/") && ua.contains(env!("CARGO_PKG_VERSION"))
                    })
            }
        }

        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("HEAD"))
            .and(path("/ua"))
            .and(CrateUaMatcher)
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = HttpClient::new();
        let url = format!("{}/ua", mock_server.uri());
        let result = client.head(&url, &HeaderMap::new()).await;
        assert!(result.is_ok(), "Default client must send User-Agent; got: {result:?}");
    }
}

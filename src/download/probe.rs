//! Capability probe: a metadata-only request that decides the transfer strategy.

use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, HeaderMap};
use tracing::{debug, instrument};

use super::client::HttpClient;
use super::error::DownloadError;

/// What the origin told us about a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capability {
    /// True only when the origin explicitly advertised byte ranges and a definitive length.
    pub accepts_ranges: bool,
    /// Resource size in bytes, when the origin announced one.
    pub content_length: Option<u64>,
}

impl Capability {
    /// Reads capability from response headers.
    ///
    /// Missing or malformed headers never imply resumability.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let advertises_bytes = headers
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("bytes"));
        Self {
            accepts_ranges: advertises_bytes && content_length.is_some(),
            content_length,
        }
    }
}

/// Probes `url` with a single `HEAD` request. Never retried here.
///
/// # Errors
///
/// Returns the transport or status error unchanged; fallback policy belongs
/// to the coordinator.
#[instrument(skip(client, headers))]
pub async fn probe(
    client: &HttpClient,
    url: &str,
    headers: &HeaderMap,
) -> Result<Capability, DownloadError> {
    let response = client.head(url, headers).await?;
    let capability = Capability::from_headers(response.headers());
    debug!(
        accepts_ranges = capability.accepts_ranges,
        content_length = ?capability.content_length,
        "probed resource"
    );
    Ok(capability)
}

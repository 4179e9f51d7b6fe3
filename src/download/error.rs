//! Error types for the download module.
//!
//! [`DownloadError`] describes a failure of a single request or range task.
//! [`TransferError`] is what a [`TransferCoordinator`](super::TransferCoordinator)
//! returns to its caller after deciding that a whole transfer cannot finish.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use super::constants::{MAX_PARALLEL, MIN_PARALLEL};

/// Errors that can occur while probing or downloading one byte range.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, reset, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// A connect or read timed out.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error (create, write, rename, etc.)
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Received size does not match the size the origin announced.
    #[error(
        "integrity check failed for {path}: expected {expected_bytes} bytes, got {actual_bytes}"
    )]
    Integrity {
        /// Path of the file that failed verification.
        path: PathBuf,
        /// Expected size in bytes.
        expected_bytes: u64,
        /// Actual size in bytes.
        actual_bytes: u64,
    },

    /// The origin answered a range request with a body that does not start where asked.
    #[error(
        "range not honored by {url}: requested offset {requested_start}, got {}",
        describe_offset(*actual_start)
    )]
    RangeNotHonored {
        /// The URL that served the response.
        url: String,
        /// First byte offset that was requested.
        requested_start: u64,
        /// First byte offset the response claimed, `None` for a full-body 200.
        actual_start: Option<u64>,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    Client {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

fn describe_offset(offset: Option<u64>) -> String {
    offset.map_or_else(|| "a full response".to_string(), |o| o.to_string())
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Maps a reqwest error to [`Timeout`](Self::Timeout) or [`Network`](Self::Network).
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::timeout(url)
        } else {
            Self::network(url, source)
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an integrity mismatch error.
    pub fn integrity(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Integrity {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates a range-not-honored error.
    pub fn range_not_honored(
        url: impl Into<String>,
        requested_start: u64,
        actual_start: Option<u64>,
    ) -> Self {
        Self::RangeNotHonored {
            url: url.into(),
            requested_start,
            actual_start,
        }
    }

    /// Returns true for errors that indicate the origin served inconsistent content.
    #[must_use]
    pub fn is_consistency(&self) -> bool {
        matches!(self, Self::Integrity { .. } | Self::RangeNotHonored { .. })
    }
}

/// Errors returned by a transfer as a whole.
#[derive(Debug, Error)]
pub enum TransferError {
    /// No mirror could be probed.
    #[error("no viable source: probing failed for all {attempted} mirror(s)")]
    NoViableSource {
        /// Number of mirrors that were probed.
        attempted: usize,
        /// The last probe failure, if any mirror was tried.
        #[source]
        last: Option<Arc<DownloadError>>,
    },

    /// The single-stream download failed and no further mirror could take over.
    #[error("stream download failed: {source}")]
    Stream {
        /// The final task failure.
        #[source]
        source: Arc<DownloadError>,
    },

    /// One or more parallel range tasks failed.
    #[error("{} of {total} range task(s) failed; first error: {}", errors.len(), first_error(errors))]
    Chunks {
        /// Number of range tasks in the batch.
        total: usize,
        /// Every captured task failure, in range order.
        errors: Vec<Arc<DownloadError>>,
    },

    /// Merged output disagrees with the probed content length.
    #[error("merged size mismatch for {path}: probed {expected_bytes} bytes, merged {actual_bytes}")]
    Consistency {
        /// Destination being assembled.
        path: PathBuf,
        /// Probed content length.
        expected_bytes: u64,
        /// Bytes actually assembled.
        actual_bytes: u64,
    },

    /// Chunk ranges do not tile the resource exactly once.
    #[error("invalid merge plan for {path}: {reason}")]
    InvalidPlan {
        /// Destination the plan was built for.
        path: PathBuf,
        /// What is wrong with the ranges.
        reason: String,
    },

    /// Local file system failure while preparing or merging.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Requested parallelism is outside the supported range.
    #[error("invalid parallelism {value}: must be between {MIN_PARALLEL} and {MAX_PARALLEL}")]
    InvalidParallelism {
        /// The rejected value.
        value: usize,
    },

    /// The transfer was cancelled by its caller.
    #[error("transfer cancelled")]
    Cancelled,

    /// The transfer's background task panicked or was aborted.
    #[error("transfer task failed: {0}")]
    TaskPanicked(String),
}

fn first_error(errors: &[Arc<DownloadError>]) -> String {
    errors
        .first()
        .map_or_else(|| "none recorded".to_string(), ToString::to_string)
}

impl TransferError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true when the failure indicates origin-side inconsistency
    /// rather than a network problem.
    #[must_use]
    pub fn is_consistency(&self) -> bool {
        match self {
            Self::Consistency { .. } => true,
            Self::Stream { source } => source.is_consistency(),
            Self::Chunks { errors, .. } => errors.iter().any(|e| e.is_consistency()),
            _ => false,
        }
    }
}

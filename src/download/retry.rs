//! Failure classification for mirror fallback decisions.
//!
//! When a range task fails, its error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - the origin or the network misbehaved; another mirror may work
//! - [`FailureType::Permanent`] - a local or input problem no mirror can fix
//! - [`FailureType::Inconsistent`] - the origin served content that contradicts its metadata
//!
//! Only transient failures make the coordinator move on to the next mirror.
//!
//! # Example
//!
//! ```
//! use mediafetch_core::download::{DownloadError, FailureType, classify_error};
//!
//! let error = DownloadError::http_status("https://cdn.example.com/v.m4s", 503);
//! assert_eq!(classify_error(&error), FailureType::Transient);
//! ```

use tracing::instrument;

use super::DownloadError;

/// Classification of download failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary or origin-specific failure that may succeed elsewhere.
    ///
    /// Examples: connection reset, timeout, any non-2xx status.
    Transient,

    /// Failure that won't succeed regardless of source.
    ///
    /// Examples: invalid URL, local disk error.
    Permanent,

    /// The origin contradicted itself (size mismatch, range ignored).
    Inconsistent,
}

impl FailureType {
    /// Returns true if trying the next mirror is worthwhile.
    #[must_use]
    pub fn allows_fallback(self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Classifies a download error into a failure type.
///
/// | Error | Type | Rationale |
/// |-------|------|-----------|
/// | HttpStatus (any) | Transient | Mirror-specific; another CDN node may serve it |
/// | Timeout | Transient | Network may recover |
/// | Network (most) | Transient | Connection reset, refused, DNS |
/// | Network (TLS) | Permanent | Certificate/config issue |
/// | Io | Permanent | Local file system issue |
/// | InvalidUrl | Permanent | Won't succeed |
/// | Client | Permanent | Local configuration issue |
/// | Integrity, RangeNotHonored | Inconsistent | Origin served conflicting content |
#[instrument]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::HttpStatus { .. } | DownloadError::Timeout { .. } => FailureType::Transient,

        DownloadError::Network { source, .. } => {
            if is_tls_error(source) {
                FailureType::Permanent
            } else {
                FailureType::Transient
            }
        }

        DownloadError::Io { .. } | DownloadError::InvalidUrl { .. } | DownloadError::Client { .. } => {
            FailureType::Permanent
        }

        DownloadError::Integrity { .. } | DownloadError::RangeNotHonored { .. } => {
            FailureType::Inconsistent
        }
    }
}

/// Checks if a reqwest error is a TLS/certificate error.
fn is_tls_error(error: &reqwest::Error) -> bool {
    let error_string = error.to_string().to_lowercase();
    error_string.contains("certificate")
        || error_string.contains("tls")
        || error_string.contains("ssl")
        || error_string.contains("handshake")
}

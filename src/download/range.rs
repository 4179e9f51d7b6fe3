//! Byte ranges, range splitting and the sentinel file names derived from them.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use super::constants::{CHUNK_INFIX, IN_FLIGHT_SUFFIX};

/// An inclusive byte span `[start, end]` of a remote resource.
///
/// Invariant: `start <= end`, enforced by [`ByteRange::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ByteRange {
    start: u64,
    end: u64,
}

impl ByteRange {
    /// Creates a range, or `None` when `start > end`.
    #[must_use]
    pub fn new(start: u64, end: u64) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// The range covering a whole resource of `size` bytes, `None` for empty resources.
    #[must_use]
    pub fn whole(size: u64) -> Option<Self> {
        size.checked_sub(1).map(|end| Self { start: 0, end })
    }

    /// First byte offset.
    #[must_use]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Last byte offset (inclusive).
    #[must_use]
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of bytes covered.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false; a range covers at least one byte.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// `Range` header value for the remainder of this range after `already` bytes.
    ///
    /// Returns `None` when nothing remains.
    #[must_use]
    pub fn header_from(&self, already: u64) -> Option<String> {
        let from = self.start.checked_add(already)?;
        (from <= self.end).then(|| format!("bytes={from}-{}", self.end))
    }

    /// Splits `[0, total)` into at most `parts` contiguous, near-equal ranges.
    ///
    /// The last range absorbs the remainder of the integer division. Never
    /// produces more ranges than there are bytes; an empty resource yields none.
    #[must_use]
    pub fn split(total: u64, parts: usize) -> Vec<Self> {
        if total == 0 {
            return Vec::new();
        }
        let parts = u64::try_from(parts.max(1)).unwrap_or(u64::MAX).min(total);
        let base = total / parts;
        (0..parts)
            .map(|index| {
                let start = index * base;
                let end = if index + 1 == parts {
                    total - 1
                } else {
                    start + base - 1
                };
                Self { start, end }
            })
            .collect()
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// `Range` header value for an open-ended request starting at `offset`.
#[must_use]
pub fn open_range_header(offset: u64) -> String {
    format!("bytes={offset}-")
}

/// Parses a `Content-Range: bytes <start>-<end>/<total|*>` header value.
///
/// Returns `(start, end, total)`.
#[must_use]
pub fn parse_content_range(value: &str) -> Option<(u64, u64, Option<u64>)> {
    let spec = value.trim().strip_prefix("bytes")?.trim_start();
    let (span, total) = spec.split_once('/')?;
    let (start, end) = span.trim().split_once('-')?;
    let start = start.trim().parse().ok()?;
    let end = end.trim().parse().ok()?;
    let total = match total.trim() {
        "*" => None,
        raw => Some(raw.parse().ok()?),
    };
    (start <= end).then_some((start, end, total))
}

/// Chunk file for one range of a parallel transfer: `<dest>.part-<start>-<end>`.
#[must_use]
pub fn chunk_path(dest: &Path, range: ByteRange) -> PathBuf {
    with_suffix(dest, &format!("{CHUNK_INFIX}{range}"))
}

/// In-flight file for a task writing to `target`: `<target>.download`.
#[must_use]
pub fn in_flight_path(target: &Path) -> PathBuf {
    with_suffix(target, IN_FLIGHT_SUFFIX)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

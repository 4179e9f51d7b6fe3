//! Stream quality selection.
//!
//! Given the variants a metadata layer reports for one stream kind (video or
//! audio) and a user preference, [`select`] deterministically picks one. An
//! unresolvable preference never fails: it degrades to the best variant.
//!
//! # Example
//!
//! ```
//! use mediafetch_core::select::{QualityPreference, StreamVariant, select};
//!
//! let variants = vec![
//!     StreamVariant::new(30216, "https://a.example/64k.m4a").with_rank(1),
//!     StreamVariant::new(30280, "https://a.example/192k.m4a").with_rank(2),
//!     StreamVariant::new(30251, "https://a.example/flac.m4a").with_rank(0).lossless(),
//! ];
//! let best = select(&variants, &QualityPreference::Max, None).map(|v| v.id);
//! assert_eq!(best, Some(30251));
//! ```

mod catalog;
mod quality;

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::debug;

pub use catalog::{CatalogError, CatalogStream, DashCatalog, SelectedStreams, select_streams};
pub use quality::{
    AUDIO_QUALITIES, LOSSLESS_AUDIO_ID, VIDEO_QUALITIES, audio_quality_name, quality_id,
    video_quality_name,
};

/// One encoded rendition of an audio or video stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamVariant {
    /// Quality identifier.
    pub id: u32,
    /// URL tried first.
    pub primary_url: String,
    /// Mirrors tried in order after the primary.
    pub backup_urls: Vec<String>,
    /// Codec string, e.g. `avc1.640032`.
    pub codec: Option<String>,
    /// Higher is better.
    pub quality_rank: i64,
    /// Bandwidth or size, used to break rank ties.
    pub size_hint: Option<u64>,
    /// Lossless variants outrank every lossy one.
    pub lossless: bool,
}

impl StreamVariant {
    /// Creates a variant whose rank equals its identifier.
    #[must_use]
    pub fn new(id: u32, primary_url: impl Into<String>) -> Self {
        Self {
            id,
            primary_url: primary_url.into(),
            backup_urls: Vec::new(),
            codec: None,
            quality_rank: i64::from(id),
            size_hint: None,
            lossless: false,
        }
    }

    /// Sets the rank.
    #[must_use]
    pub fn with_rank(mut self, rank: i64) -> Self {
        self.quality_rank = rank;
        self
    }

    /// Sets the codec string.
    #[must_use]
    pub fn with_codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = Some(codec.into());
        self
    }

    /// Sets the backup URLs.
    #[must_use]
    pub fn with_backups<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.backup_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the size hint.
    #[must_use]
    pub fn with_size_hint(mut self, size: u64) -> Self {
        self.size_hint = Some(size);
        self
    }

    /// Marks the variant lossless.
    #[must_use]
    pub fn lossless(mut self) -> Self {
        self.lossless = true;
        self
    }

    /// Primary URL followed by backups: the mirror list for a transfer.
    #[must_use]
    pub fn mirrors(&self) -> Vec<String> {
        std::iter::once(self.primary_url.clone())
            .chain(self.backup_urls.iter().cloned())
            .collect()
    }

    fn order_key(&self) -> (bool, i64, u64) {
        (self.lossless, self.quality_rank, self.size_hint.unwrap_or(0))
    }
}

/// What the user asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum QualityPreference {
    /// Best available.
    #[default]
    Max,
    /// Smallest available.
    Min,
    /// An explicit quality identifier.
    Id(u32),
    /// A quality name such as `1080P` or `132K`.
    Name(String),
}

impl QualityPreference {
    /// Parses a preference; any string is accepted.
    ///
    /// `max`/`min` (any case), a decimal identifier, or anything else as a name.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case("max") {
            Self::Max
        } else if value.eq_ignore_ascii_case("min") {
            Self::Min
        } else if let Ok(id) = value.parse::<u32>() {
            Self::Id(id)
        } else {
            Self::Name(value.to_string())
        }
    }
}

impl FromStr for QualityPreference {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for QualityPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Max => f.write_str("max"),
            Self::Min => f.write_str("min"),
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// Codec family a variant must belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecConstraint {
    /// H.264 (`avc1`).
    Avc,
    /// H.265 (`hev1`, `hvc1`).
    Hevc,
    /// AV1 (`av01`).
    Av1,
    /// Any other codec string prefix, lowercase.
    Other(String),
}

impl CodecConstraint {
    /// Parses a codec family name.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "avc" | "h264" | "h.264" => Self::Avc,
            "hevc" | "h265" | "h.265" => Self::Hevc,
            "av1" => Self::Av1,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns true if `codec` belongs to this family.
    #[must_use]
    pub fn matches(&self, codec: &str) -> bool {
        let codec = codec.to_ascii_lowercase();
        match self {
            Self::Avc => codec.starts_with("avc"),
            Self::Hevc => codec.starts_with("hev") || codec.starts_with("hvc"),
            Self::Av1 => codec.starts_with("av01"),
            Self::Other(prefix) => codec.starts_with(prefix.as_str()),
        }
    }

    fn accepts(&self, variant: &StreamVariant) -> bool {
        variant.codec.as_deref().is_some_and(|codec| self.matches(codec))
    }
}

impl FromStr for CodecConstraint {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

/// Picks one variant. Returns `None` only for an empty list.
///
/// 1. An identifier (or a known name mapping to one) present in `variants`
///    wins, narrowed by `constraint` when several variants share it.
/// 2. `max`/`min` pick the extreme rank among variants matching `constraint`,
///    or among all variants when none match.
/// 3. Anything unresolved behaves as `max`.
///
/// Lossless variants outrank every lossy rank. Ties keep the earlier variant.
#[must_use]
pub fn select<'a>(
    variants: &'a [StreamVariant],
    preference: &QualityPreference,
    constraint: Option<&CodecConstraint>,
) -> Option<&'a StreamVariant> {
    let wanted = match preference {
        QualityPreference::Id(id) => Some(*id),
        QualityPreference::Name(name) => quality_id(name),
        QualityPreference::Max | QualityPreference::Min => None,
    };

    if let Some(id) = wanted {
        let with_id: Vec<&StreamVariant> = variants.iter().filter(|v| v.id == id).collect();
        if let Some(first) = with_id.first() {
            let narrowed = constraint
                .and_then(|c| with_id.iter().find(|v| c.accepts(v)))
                .unwrap_or(first);
            return Some(narrowed);
        }
        debug!(%preference, "preferred quality unavailable, using best");
    } else if let QualityPreference::Name(name) = preference {
        debug!(name = %name, "unknown quality name, using best");
    }

    let matching: Vec<&StreamVariant> = match constraint {
        Some(c) => variants.iter().filter(|v| c.accepts(v)).collect(),
        None => Vec::new(),
    };
    let pool: Vec<&StreamVariant> = if matching.is_empty() {
        variants.iter().collect()
    } else {
        matching
    };

    let lowest = matches!(preference, QualityPreference::Min);
    pool.into_iter().fold(None, |best: Option<&StreamVariant>, candidate| match best {
        None => Some(candidate),
        Some(current) => {
            let better = if lowest {
                candidate.order_key() < current.order_key()
            } else {
                candidate.order_key() > current.order_key()
            };
            Some(if better { candidate } else { current })
        }
    })
}

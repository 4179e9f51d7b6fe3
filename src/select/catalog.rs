//! DASH catalog parsing and combined audio/video selection.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::quality::LOSSLESS_AUDIO_ID;
use super::{CodecConstraint, QualityPreference, StreamVariant, select};

/// Errors produced while reading a stream catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The document is not valid JSON or does not have the expected shape.
    #[error("malformed stream catalog: {source}")]
    Malformed {
        #[source]
        source: serde_json::Error,
    },

    /// A stream entry carries no URL.
    #[error("stream {id} has no base URL")]
    MissingUrl { id: u32 },

    /// The catalog lists no video streams.
    #[error("stream catalog has no video streams")]
    NoVideo,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Document {
    Wrapped { dash: RawDash },
    Bare(RawDash),
}

#[derive(Debug, Deserialize)]
struct RawDash {
    #[serde(default)]
    video: Option<Vec<RawStream>>,
    #[serde(default)]
    audio: Option<Vec<RawStream>>,
    #[serde(default)]
    flac: Option<RawFlac>,
}

#[derive(Debug, Deserialize)]
struct RawFlac {
    #[serde(default)]
    audio: Option<RawStream>,
}

// Some payloads carry both spellings of the URL keys, so they are separate
// fields rather than aliases.
#[derive(Debug, Deserialize)]
struct RawStream {
    id: u32,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default, rename = "baseUrl")]
    base_url_camel: Option<String>,
    #[serde(default)]
    backup_url: Option<Vec<String>>,
    #[serde(default, rename = "backupUrl")]
    backup_url_camel: Option<Vec<String>>,
    #[serde(default)]
    codecs: Option<String>,
    #[serde(default)]
    bandwidth: Option<u64>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

impl RawStream {
    fn into_stream(self, lossless: bool) -> Result<CatalogStream, CatalogError> {
        let primary_url = self
            .base_url
            .or(self.base_url_camel)
            .filter(|url| !url.is_empty())
            .ok_or(CatalogError::MissingUrl { id: self.id })?;
        let backup_urls = self
            .backup_url
            .or(self.backup_url_camel)
            .unwrap_or_default();

        let mut variant = StreamVariant::new(self.id, primary_url).with_backups(backup_urls);
        variant.codec = self.codecs.filter(|codec| !codec.is_empty());
        variant.size_hint = self.bandwidth;
        variant.lossless = lossless || self.id == LOSSLESS_AUDIO_ID;

        Ok(CatalogStream {
            variant,
            width: self.width,
            height: self.height,
        })
    }
}

/// A stream variant plus the display metadata the catalog carried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogStream {
    /// The selectable variant.
    #[serde(flatten)]
    pub variant: StreamVariant,
    /// Frame width, video only.
    pub width: Option<u32>,
    /// Frame height, video only.
    pub height: Option<u32>,
}

/// Parsed DASH catalog: every video and audio rendition of one resource.
#[derive(Debug, Clone, Default)]
pub struct DashCatalog {
    video: Vec<CatalogStream>,
    audio: Option<Vec<CatalogStream>>,
}

impl DashCatalog {
    /// Parses a catalog, either `{"dash": {...}}` or the bare inner object.
    ///
    /// The lossless `flac.audio` stream, when present, is appended to the
    /// audio list. A missing or null audio list and no flac stream means the
    /// resource has no audio track.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Malformed`] for invalid JSON and
    /// [`CatalogError::MissingUrl`] for a stream without a URL.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let document: Document =
            serde_json::from_str(json).map_err(|source| CatalogError::Malformed { source })?;
        let raw = match document {
            Document::Wrapped { dash } | Document::Bare(dash) => dash,
        };

        let video = raw
            .video
            .unwrap_or_default()
            .into_iter()
            .map(|stream| stream.into_stream(false))
            .collect::<Result<Vec<_>, _>>()?;

        let mut audio = raw
            .audio
            .map(|streams| {
                streams
                    .into_iter()
                    .map(|stream| stream.into_stream(false))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;

        if let Some(flac) = raw.flac.and_then(|flac| flac.audio) {
            let stream = flac.into_stream(true)?;
            audio.get_or_insert_with(Vec::new).push(stream);
        }

        debug!(
            video = video.len(),
            audio = audio.as_ref().map_or(0, Vec::len),
            "parsed stream catalog"
        );
        Ok(Self { video, audio })
    }

    /// Video renditions in catalog order.
    #[must_use]
    pub fn video(&self) -> &[CatalogStream] {
        &self.video
    }

    /// Audio renditions in catalog order, `None` when the resource has no audio.
    #[must_use]
    pub fn audio(&self) -> Option<&[CatalogStream]> {
        self.audio.as_deref()
    }

    /// True when the resource has at least one audio rendition.
    #[must_use]
    pub fn has_audio(&self) -> bool {
        self.audio.as_ref().is_some_and(|audio| !audio.is_empty())
    }
}

/// Streams chosen for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedStreams {
    /// Chosen video rendition.
    pub video: CatalogStream,
    /// Chosen audio rendition, absent when the resource has no audio.
    pub audio: Option<CatalogStream>,
}

/// Picks one video and at most one audio rendition.
///
/// The codec constraint applies to video only.
///
/// # Errors
///
/// Returns [`CatalogError::NoVideo`] when the catalog has no video streams.
pub fn select_streams(
    catalog: &DashCatalog,
    video_preference: &QualityPreference,
    audio_preference: &QualityPreference,
    video_codec: Option<&CodecConstraint>,
) -> Result<SelectedStreams, CatalogError> {
    let video = pick(&catalog.video, video_preference, video_codec).ok_or(CatalogError::NoVideo)?;
    let audio = catalog
        .audio
        .as_deref()
        .and_then(|audio| pick(audio, audio_preference, None));
    Ok(SelectedStreams { video, audio })
}

fn pick(
    streams: &[CatalogStream],
    preference: &QualityPreference,
    constraint: Option<&CodecConstraint>,
) -> Option<CatalogStream> {
    let variants: Vec<StreamVariant> = streams.iter().map(|s| s.variant.clone()).collect();
    let chosen = select(&variants, preference, constraint)?;
    // Variants are cloned in order, so the offset maps back to the stream.
    let index = variants
        .iter()
        .position(|candidate| std::ptr::eq(candidate, chosen))?;
    streams.get(index).cloned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "dash": {
            "video": [
                {"id": 120, "base_url": "https://v.example/120-avc", "backup_url": ["https://b.example/120-avc"],
                 "codecs": "avc1.640033", "bandwidth": 9000000, "width": 3840, "height": 2160},
                {"id": 120, "baseUrl": "https://v.example/120-hevc", "backupUrl": null,
                 "codecs": "hev1.1.6.L153.90", "bandwidth": 7000000, "width": 3840, "height": 2160},
                {"id": 80, "base_url": "https://v.example/80-avc", "baseUrl": "https://v.example/80-avc",
                 "backup_url": [], "backupUrl": [],
                 "codecs": "avc1.640032", "bandwidth": 3000000, "width": 1920, "height": 1080},
                {"id": 16, "base_url": "https://v.example/16-avc", "backup_url": null,
                 "codecs": "avc1.64001E", "bandwidth": 300000, "width": 600, "height": 338}
            ],
            "audio": [
                {"id": 30216, "base_url": "https://a.example/64k", "codecs": "mp4a.40.2", "bandwidth": 52761},
                {"id": 30232, "base_url": "https://a.example/132k", "codecs": "mp4a.40.2", "bandwidth": 132000},
                {"id": 30280, "base_url": "https://a.example/192k", "codecs": "mp4a.40.2", "bandwidth": 192000}
            ],
            "flac": {"display": true, "audio":
                {"id": 30251, "base_url": "https://a.example/flac", "codecs": "fLaC", "bandwidth": 706587}}
        }
    }"#;

    fn pref(value: &str) -> QualityPreference {
        QualityPreference::parse(value)
    }

    #[test]
    fn test_parses_wrapped_catalog_with_flac() {
        let catalog = DashCatalog::from_json(SAMPLE).unwrap();
        assert_eq!(catalog.video().len(), 4);
        let audio = catalog.audio().unwrap();
        assert_eq!(audio.len(), 4);
        assert!(audio[3].variant.lossless);
        assert!(audio.iter().take(3).all(|a| !a.variant.lossless));
        assert_eq!(
            catalog.video()[0].variant.mirrors(),
            vec!["https://v.example/120-avc", "https://b.example/120-avc"]
        );
        assert_eq!(catalog.video()[1].variant.primary_url, "https://v.example/120-hevc");
        assert!(catalog.video()[1].variant.backup_urls.is_empty());
    }

    #[test]
    fn test_min_selection() {
        let catalog = DashCatalog::from_json(SAMPLE).unwrap();
        let chosen = select_streams(&catalog, &pref("min"), &pref("min"), None).unwrap();
        assert_eq!(chosen.video.height, Some(338));
        assert_eq!(chosen.audio.unwrap().variant.size_hint, Some(52761));
    }

    #[test]
    fn test_max_selection_prefers_flac() {
        let catalog = DashCatalog::from_json(SAMPLE).unwrap();
        let chosen = select_streams(&catalog, &pref("max"), &pref("max"), None).unwrap();
        assert_eq!(chosen.video.height, Some(2160));
        let audio = chosen.audio.unwrap();
        assert_eq!(audio.variant.id, LOSSLESS_AUDIO_ID);
        assert_eq!(audio.variant.size_hint, Some(706587));
    }

    #[test]
    fn test_named_selection() {
        let catalog = DashCatalog::from_json(SAMPLE).unwrap();
        let chosen = select_streams(&catalog, &pref("1080p"), &pref("132k"), None).unwrap();
        assert_eq!(chosen.video.variant.id, 80);
        assert_eq!(chosen.audio.unwrap().variant.id, 30232);
    }

    #[test]
    fn test_video_codec_constraint() {
        let catalog = DashCatalog::from_json(SAMPLE).unwrap();
        let chosen =
            select_streams(&catalog, &pref("max"), &pref("max"), Some(&CodecConstraint::Hevc))
                .unwrap();
        assert_eq!(chosen.video.variant.primary_url, "https://v.example/120-hevc");
        // Audio is unaffected by the video codec.
        assert_eq!(chosen.audio.unwrap().variant.id, LOSSLESS_AUDIO_ID);
    }

    #[test]
    fn test_unknown_id_behaves_as_max() {
        let catalog = DashCatalog::from_json(SAMPLE).unwrap();
        let unknown = select_streams(&catalog, &pref("999999"), &pref("999999"), None).unwrap();
        let max = select_streams(&catalog, &pref("max"), &pref("max"), None).unwrap();
        assert_eq!(unknown, max);
    }

    #[test]
    fn test_bare_catalog_without_audio() {
        let json = r#"{"video": [{"id": 64, "baseUrl": "https://v.example/64"}], "audio": null}"#;
        let catalog = DashCatalog::from_json(json).unwrap();
        assert!(!catalog.has_audio());
        let chosen = select_streams(&catalog, &pref("max"), &pref("max"), None).unwrap();
        assert_eq!(chosen.video.variant.id, 64);
        assert!(chosen.audio.is_none());
    }

    #[test]
    fn test_flac_only_audio_is_present() {
        let json = r#"{"video": [{"id": 64, "base_url": "https://v.example/64"}],
                       "flac": {"audio": {"id": 30251, "base_url": "https://a.example/flac"}}}"#;
        let catalog = DashCatalog::from_json(json).unwrap();
        assert!(catalog.has_audio());
        assert_eq!(catalog.audio().unwrap().len(), 1);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            DashCatalog::from_json("not json"),
            Err(CatalogError::Malformed { .. })
        ));
        assert!(matches!(
            DashCatalog::from_json(r#"{"video": [{"id": 80}]}"#),
            Err(CatalogError::MissingUrl { id: 80 })
        ));
        let empty = DashCatalog::from_json(r#"{"video": []}"#).unwrap();
        assert!(matches!(
            select_streams(&empty, &pref("max"), &pref("max"), None),
            Err(CatalogError::NoVideo)
        ));
    }
}

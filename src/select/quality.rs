//! Known quality identifiers and their display names.

/// Identifier of the lossless (FLAC) audio rendition.
pub const LOSSLESS_AUDIO_ID: u32 = 30251;

/// Video quality identifiers, lowest to highest.
pub const VIDEO_QUALITIES: &[(u32, &str)] = &[
    (16, "360P"),
    (32, "480P"),
    (64, "720P"),
    (74, "720P60"),
    (80, "1080P"),
    (112, "1080P+"),
    (116, "1080P60"),
    (120, "4K"),
    (125, "HDR"),
    (126, "DOLBY"),
    (127, "8K"),
];

/// Audio quality identifiers, lowest to highest bitrate.
pub const AUDIO_QUALITIES: &[(u32, &str)] = &[
    (30216, "64K"),
    (30232, "132K"),
    (30280, "192K"),
    (LOSSLESS_AUDIO_ID, "FLAC"),
];

/// Looks up an identifier by name in both tables, ignoring ASCII case.
#[must_use]
pub fn quality_id(name: &str) -> Option<u32> {
    let name = name.trim();
    VIDEO_QUALITIES
        .iter()
        .chain(AUDIO_QUALITIES)
        .find(|(_, known)| known.eq_ignore_ascii_case(name))
        .map(|(id, _)| *id)
}

/// Display name of a video quality identifier.
#[must_use]
pub fn video_quality_name(id: u32) -> Option<&'static str> {
    lookup(VIDEO_QUALITIES, id)
}

/// Display name of an audio quality identifier.
#[must_use]
pub fn audio_quality_name(id: u32) -> Option<&'static str> {
    lookup(AUDIO_QUALITIES, id)
}

fn lookup(table: &[(u32, &'static str)], id: u32) -> Option<&'static str> {
    table.iter().find(|(known, _)| *known == id).map(|(_, name)| *name)
}

//! Track metadata, candidate matches and cover images

use serde::{Deserialize, Serialize};

/// Metadata written into the output file's tags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub artist: String,
    pub title: String,
    pub album: String,
    pub track_number: Option<u32>,
    pub year: Option<i32>,
    /// MusicBrainz release group of `album`, used for cover lookups
    pub release_group_id: Option<String>,
}

impl TrackMetadata {
    pub fn new(artist: impl Into<String>, title: impl Into<String>, album: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
            album: album.into(),
            track_number: None,
            year: None,
            release_group_id: None,
        }
    }

    /// "Artist - Title", the form used for file names and fuzzy matching
    pub fn display_name(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }

    /// Album title without the synthetic " - Single" suffix
    pub fn album_for_search(&self) -> &str {
        self.album.strip_suffix(SINGLE_SUFFIX).unwrap_or(&self.album)
    }
}

impl std::fmt::Display for TrackMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {} [{}]", self.artist, self.title, self.album)
    }
}

pub const SINGLE_SUFFIX: &str = " - Single";

/// Album name used when a recording has no album or single release
pub fn single_album_name(title: &str) -> String {
    format!("{}{}", title, SINGLE_SUFFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReleaseType {
    Other,
    Single,
    Album,
}

impl ReleaseType {
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "album" => ReleaseType::Album,
            "single" => ReleaseType::Single,
            _ => ReleaseType::Other,
        }
    }
}

/// One recording proposed by the identification service
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateMatch {
    pub metadata: TrackMetadata,
    /// Acoustic confidence, 0.0 - 1.0
    pub score: f64,
    pub release_type: ReleaseType,
    pub recording_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverImage {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl CoverImage {
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
        }
    }

    /// Guess the MIME type from the leading magic bytes
    pub fn sniff(data: Vec<u8>) -> Option<Self> {
        let mime = if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            "image/jpeg"
        } else if data.starts_with(b"\x89PNG\r\n\x1a\n") {
            "image/png"
        } else if data.len() > 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
            "image/webp"
        } else {
            return None;
        };
        Some(Self::new(data, mime))
    }

    pub fn is_jpeg(&self) -> bool {
        self.mime_type == "image/jpeg"
    }
}

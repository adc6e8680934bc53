//! Handling of songs without a confident match

use crate::track::{single_album_name, TrackMetadata};
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

/// What to do when the selector finds no confident match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStrategy {
    /// Let the user review and correct the best guess
    Prompt,
    /// Leave the audio untagged in the skip directory
    Skip,
    /// Derive artist and title from the video title or file name
    Filename,
    /// Abort the request
    Fail,
}

/// Result of a manual review
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualEdit {
    pub metadata: TrackMetadata,
    /// Send the corrected metadata to the identification service
    pub submit: bool,
}

/// Interactive review of proposed metadata
#[async_trait]
pub trait MetadataEditor: Send + Sync {
    async fn review(
        &self,
        source_title: &str,
        proposed: &TrackMetadata,
        confident: bool,
    ) -> std::io::Result<ManualEdit>;
}

fn noise_pattern() -> &'static Regex {
    static NOISE: OnceLock<Regex> = OnceLock::new();
    NOISE.get_or_init(|| {
        // Bracketed suffixes such as "(Official Video)" or "[HD]"
        Regex::new(r"\s*[\(\[][^\)\]]*[\)\]]").expect("static regex")
    })
}

/// Guess metadata from a "Artist - Title (Official Video)" style title
pub fn metadata_from_title(source_title: &str) -> TrackMetadata {
    let stripped = noise_pattern().replace_all(source_title, "");
    // A title made only of bracketed text is kept as it is
    let cleaned = match stripped.trim() {
        "" if source_title.trim().is_empty() => "Unknown Title",
        "" => source_title.trim(),
        cleaned => cleaned,
    };

    let (artist, title) = match cleaned.split_once(" - ") {
        Some((artist, title)) if !artist.trim().is_empty() && !title.trim().is_empty() => {
            (artist.trim().to_string(), title.trim().to_string())
        }
        _ => ("Unknown Artist".to_string(), cleaned.to_string()),
    };

    let album = single_album_name(&title);
    TrackMetadata::new(artist, title, album)
}

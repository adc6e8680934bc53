//! ID3 tagging and atomic placement of output files

use crate::error::WriteError;
use crate::track::{CoverImage, TrackMetadata};
use id3::frame::{Picture, PictureType};
use id3::{Tag, TagLike, Version};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// File name of the tagged output, e.g. `Band B - Song A.mp3`
pub fn output_file_name(metadata: &TrackMetadata) -> String {
    format!("{}.mp3", sanitize_filename(&metadata.display_name()))
}

/// Sanitize filename for filesystem
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            // Division slash keeps "AC/DC" readable
            '/' => '\u{29F8}',
            '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            _ => c,
        })
        .collect::<String>()
        .trim()
        .trim_end_matches('.')
        .to_string()
}

/// Build a fresh tag holding exactly the selected metadata and cover
pub fn build_tag(metadata: &TrackMetadata, cover: Option<&CoverImage>) -> Tag {
    let mut tag = Tag::new();
    tag.set_artist(metadata.artist.as_str());
    tag.set_title(metadata.title.as_str());
    tag.set_album(metadata.album.as_str());
    tag.set_album_artist(metadata.artist.as_str());
    if let Some(track) = metadata.track_number {
        tag.set_track(track);
    }
    if let Some(year) = metadata.year {
        tag.set_year(year);
    }
    if let Some(cover) = cover {
        tag.add_frame(Picture {
            mime_type: cover.mime_type.clone(),
            picture_type: PictureType::CoverFront,
            description: "Cover".to_string(),
            data: cover.data.clone(),
        });
    }
    tag
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Tagger;

impl Tagger {
    pub fn new() -> Self {
        Self
    }

    /// Tag a copy of `audio` and move it into `output_dir`.
    ///
    /// The tagged file is assembled under a temporary name in `output_dir`
    /// and renamed into place, so the destination either holds the complete
    /// result or is left untouched.
    pub fn write(
        &self,
        audio: &Path,
        output_dir: &Path,
        metadata: &TrackMetadata,
        cover: Option<&CoverImage>,
    ) -> Result<PathBuf, WriteError> {
        info!("Tagging: {}", metadata);
        std::fs::create_dir_all(output_dir)?;

        let destination = output_dir.join(output_file_name(metadata));
        let staged = copy_to_staging(audio, output_dir)?;

        let tag = build_tag(metadata, cover);
        tag.write_to_path(staged.path(), Version::Id3v23)?;

        staged
            .persist(&destination)
            .map_err(|e| WriteError::Persist(e.error.to_string()))?;

        debug!("Wrote: {}", destination.display());
        Ok(destination)
    }
}

/// Atomically place an untouched copy of `source` at `destination`
pub fn place_copy(source: &Path, destination: &Path) -> Result<(), WriteError> {
    let dir = destination.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let staged = copy_to_staging(source, dir)?;
    staged
        .persist(destination)
        .map_err(|e| WriteError::Persist(e.error.to_string()))?;
    Ok(())
}

fn copy_to_staging(source: &Path, dir: &Path) -> Result<NamedTempFile, WriteError> {
    let mut staged = tempfile::Builder::new()
        .prefix(".songtag-")
        .suffix(".partial")
        .tempfile_in(dir)?;
    let mut input = std::fs::File::open(source)?;
    std::io::copy(&mut input, staged.as_file_mut())?;
    staged.as_file().sync_all()?;
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> TrackMetadata {
        TrackMetadata {
            artist: "Band B".to_string(),
            title: "Song A".to_string(),
            album: "First Album".to_string(),
            track_number: Some(3),
            year: Some(2009),
            release_group_id: None,
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Normal Title"), "Normal Title");
        assert_eq!(sanitize_filename("AC/DC - Song"), "AC\u{29F8}DC - Song");
        assert_eq!(sanitize_filename("Title:With*Special?Chars"), "Title_With_Special_Chars");
        assert_eq!(sanitize_filename("  Spaces  "), "Spaces");
    }

    #[test]
    fn test_output_file_name() {
        let meta = TrackMetadata::new("Band B", "Song A", "Song A - Single");
        assert_eq!(output_file_name(&meta), "Band B - Song A.mp3");
    }

    #[test]
    fn test_write_tags_and_cover() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("normalized.mp3");
        std::fs::write(&audio, vec![0u8; 512]).unwrap();
        let out_dir = dir.path().join("finished");
        let cover = CoverImage::new(vec![0xFF, 0xD8, 0xFF, 0xE0, 9, 9], "image/jpeg");

        let path = Tagger::new()
            .write(&audio, &out_dir, &sample_metadata(), Some(&cover))
            .unwrap();
        assert_eq!(path, out_dir.join("Band B - Song A.mp3"));

        let tag = Tag::read_from_path(&path).unwrap();
        assert_eq!(tag.artist(), Some("Band B"));
        assert_eq!(tag.title(), Some("Song A"));
        assert_eq!(tag.album(), Some("First Album"));
        assert_eq!(tag.track(), Some(3));
        assert_eq!(tag.year(), Some(2009));
        let pictures: Vec<_> = tag.pictures().collect();
        assert_eq!(pictures.len(), 1);
        assert_eq!(pictures[0].data, cover.data);
        assert_eq!(pictures[0].picture_type, PictureType::CoverFront);

        // Nothing but the result is left in the output directory
        let entries: Vec<_> = std::fs::read_dir(&out_dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_write_without_cover() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("normalized.mp3");
        std::fs::write(&audio, vec![0u8; 128]).unwrap();

        let path = Tagger::new()
            .write(&audio, dir.path(), &sample_metadata(), None)
            .unwrap();

        let tag = Tag::read_from_path(&path).unwrap();
        assert_eq!(tag.pictures().count(), 0);
        assert_eq!(tag.artist(), Some("Band B"));
    }

    #[test]
    fn test_failed_write_leaves_no_destination() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist.mp3");
        let out_dir = dir.path().join("finished");

        let result = Tagger::new().write(&missing, &out_dir, &sample_metadata(), None);
        assert!(matches!(result, Err(WriteError::Io(_))));
        assert_eq!(std::fs::read_dir(&out_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_place_copy() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("raw.mp3");
        std::fs::write(&source, b"raw").unwrap();
        let destination = dir.path().join("skipped/raw.mp3");

        place_copy(&source, &destination).unwrap();
        assert_eq!(std::fs::read(&destination).unwrap(), b"raw");
        assert!(source.exists());
    }
}

//! Cover art search
//!
//! Cover art is best effort: every failure is logged and turned into `None`.

use crate::track::{CoverImage, TrackMetadata};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const COVER_ART_ARCHIVE_URL: &str = "https://coverartarchive.org";

/// Image search for album covers
#[async_trait]
pub trait CoverArtSource: Send + Sync {
    async fn search_image(&self, metadata: &TrackMetadata) -> Option<CoverImage>;
}

/// Front covers from the Cover Art Archive, keyed by release group
pub struct CoverArtArchive {
    http_client: reqwest::Client,
    base_url: String,
    size: u32,
}

impl CoverArtArchive {
    pub fn new(size: u32, timeout: Duration) -> reqwest::Result<Self> {
        Self::with_base_url(COVER_ART_ARCHIVE_URL, size, timeout)
    }

    pub fn with_base_url(base_url: &str, size: u32, timeout: Duration) -> reqwest::Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("songtag/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            size,
        })
    }

    fn front_url(&self, release_group_id: &str) -> String {
        format!(
            "{}/release-group/{}/front-{}",
            self.base_url,
            release_group_id,
            thumbnail_size(self.size)
        )
    }

    async fn fetch(&self, url: &str) -> reqwest::Result<Option<CoverImage>> {
        let response = self.http_client.get(url).send().await?;
        if !response.status().is_success() {
            debug!("Cover Art Archive returned {} for {}", response.status(), url);
            return Ok(None);
        }

        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        let data = response.bytes().await?.to_vec();

        Ok(match mime {
            Some(mime) if mime.starts_with("image/") => Some(CoverImage::new(data, mime)),
            _ => CoverImage::sniff(data),
        })
    }
}

/// Cover Art Archive serves 250, 500 and 1200 pixel thumbnails
fn thumbnail_size(requested: u32) -> u32 {
    match requested {
        0..=250 => 250,
        251..=500 => 500,
        _ => 1200,
    }
}

#[async_trait]
impl CoverArtSource for CoverArtArchive {
    async fn search_image(&self, metadata: &TrackMetadata) -> Option<CoverImage> {
        let Some(release_group) = metadata.release_group_id.as_deref() else {
            debug!("No release group for {}, skipping Cover Art Archive", metadata);
            return None;
        };

        let url = self.front_url(release_group);
        match self.fetch(&url).await {
            Ok(image) => image,
            Err(e) => {
                warn!("Cover Art Archive request failed: {}", e);
                None
            }
        }
    }
}

/// Cover search through the `sacad` tool
pub struct Sacad {
    sacad_path: Option<PathBuf>,
    size: u32,
    extra_args: Vec<String>,
}

impl Sacad {
    pub fn new(sacad_path: Option<PathBuf>, size: u32, extra_args: Vec<String>) -> Self {
        Self {
            sacad_path,
            size,
            extra_args: crate::downloader::trim_extra_args(extra_args),
        }
    }
}

#[async_trait]
impl CoverArtSource for Sacad {
    async fn search_image(&self, metadata: &TrackMetadata) -> Option<CoverImage> {
        let Some(sacad) = self.sacad_path.as_ref() else {
            warn!("sacad not found, cannot search cover art");
            return None;
        };

        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Cannot create cover directory: {}", e);
                return None;
            }
        };
        let target = dir.path().join("cover.jpg");

        let mut cmd = Command::new(sacad);
        cmd.args(["--verbosity", "quiet"])
            .arg(&metadata.artist)
            .arg(metadata.album_for_search())
            .arg(self.size.to_string())
            .arg(&target)
            .args(&self.extra_args);
        debug!("Running: {:?}", cmd);

        let output = match cmd.output().await {
            Ok(output) => output,
            Err(e) => {
                warn!("Failed to run sacad: {}", e);
                return None;
            }
        };
        if !output.status.success() {
            warn!(
                "sacad failed with exit code {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return None;
        }

        match tokio::fs::read(&target).await {
            Ok(data) => CoverImage::sniff(data),
            Err(_) => {
                debug!("sacad found no cover for {}", metadata);
                None
            }
        }
    }
}

/// Lossless JPEG optimization through `jpegtran`
#[derive(Debug, Clone)]
pub struct Recompressor {
    jpegtran_path: Option<PathBuf>,
}

impl Recompressor {
    pub fn new(jpegtran_path: Option<PathBuf>) -> Self {
        Self { jpegtran_path }
    }

    /// Returns the smaller of the original and the recompressed image
    pub async fn recompress(&self, image: CoverImage) -> CoverImage {
        if !image.is_jpeg() {
            return image;
        }
        let Some(jpegtran) = self.jpegtran_path.as_ref() else {
            debug!("jpegtran not found, keeping cover as is");
            return image;
        };

        match self.run(jpegtran, &image.data).await {
            Ok(data) if !data.is_empty() && data.len() < image.data.len() => {
                debug!("Recompressed cover: {} -> {} bytes", image.data.len(), data.len());
                CoverImage::new(data, image.mime_type)
            }
            Ok(_) => image,
            Err(e) => {
                warn!("Cover recompression failed, keeping original: {}", e);
                image
            }
        }
    }

    async fn run(&self, jpegtran: &Path, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("in.jpg");
        let output = dir.path().join("out.jpg");
        tokio::fs::write(&input, data).await?;

        let status = Command::new(jpegtran)
            .args(["-copy", "none", "-optimize", "-outfile"])
            .arg(&output)
            .arg(&input)
            .status()
            .await?;

        if !status.success() {
            return Err(std::io::Error::other(format!(
                "jpegtran exited with {:?}",
                status.code()
            )));
        }
        tokio::fs::read(&output).await
    }
}

/// Cover art stage: search, then optionally recompress
pub struct CoverArtFetcher {
    source: Box<dyn CoverArtSource>,
    recompressor: Option<Recompressor>,
}

impl CoverArtFetcher {
    pub fn new(source: Box<dyn CoverArtSource>, recompressor: Option<Recompressor>) -> Self {
        Self { source, recompressor }
    }
}

#[async_trait]
impl CoverArtSource for CoverArtFetcher {
    async fn search_image(&self, metadata: &TrackMetadata) -> Option<CoverImage> {
        let image = self.source.search_image(metadata).await?;
        info!("Found cover art ({}, {} bytes)", image.mime_type, image.data.len());

        match &self.recompressor {
            Some(recompressor) => Some(recompressor.recompress(image).await),
            None => Some(image),
        }
    }
}

/// Used when cover art is disabled
pub struct NoCoverArt;

#[async_trait]
impl CoverArtSource for NoCoverArt {
    async fn search_image(&self, _metadata: &TrackMetadata) -> Option<CoverImage> {
        None
    }
}

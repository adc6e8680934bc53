//! Pipeline orchestration for a single song request
//!
//! Stages run strictly in order:
//! `Resolving → Downloading → Fingerprinting → Selecting → FetchingArt →
//! Normalizing → Tagging → Done`. Any stage may fail, which aborts the run.
//! Intermediate files live in a scratch directory owned by the run and
//! removed when it ends, whatever the outcome.

use crate::cover::CoverArtSource;
use crate::downloader::{DownloadedAudio, MediaSource};
use crate::error::{Result, SongTagError};
use crate::fallback::{metadata_from_title, FallbackStrategy, MetadataEditor};
use crate::fingerprint::Fingerprint;
use crate::matcher::Identifier;
use crate::normalizer::LoudnessNormalizer;
use crate::resolver::SongRequest;
use crate::selector::{NoConfidentMatch, Selector};
use crate::tagger::{self, Tagger};
use crate::track::TrackMetadata;

use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Pipeline states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolving,
    Downloading,
    Fingerprinting,
    Selecting,
    FetchingArt,
    Normalizing,
    Tagging,
    Done,
}

impl Stage {
    /// The state following this one on the success path
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Resolving => Some(Stage::Downloading),
            Stage::Downloading => Some(Stage::Fingerprinting),
            Stage::Fingerprinting => Some(Stage::Selecting),
            Stage::Selecting => Some(Stage::FetchingArt),
            Stage::FetchingArt => Some(Stage::Normalizing),
            Stage::Normalizing => Some(Stage::Tagging),
            Stage::Tagging => Some(Stage::Done),
            Stage::Done => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Resolving => "resolve",
            Stage::Downloading => "download",
            Stage::Fingerprinting => "fingerprint",
            Stage::Selecting => "select",
            Stage::FetchingArt => "cover art",
            Stage::Normalizing => "normalize",
            Stage::Tagging => "tag",
            Stage::Done => "done",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Progress events sent while a request is processed
#[derive(Debug, Clone)]
pub enum PipelineStage {
    Entered { stage: Stage, detail: String },
    Complete { output: PathBuf, duration: Duration },
    Skipped { path: PathBuf },
    Failed { stage: Stage, error: String },
}

/// How a successful run ended
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Tagged { path: PathBuf, metadata: TrackMetadata },
    /// No confident match; raw audio placed in the skip directory
    Skipped { path: PathBuf },
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub output_dir: PathBuf,
    pub download_dir: PathBuf,
    pub skip_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub keep_intermediate: bool,
    pub fetch_cover: bool,
    pub fallback: FallbackStrategy,
    /// Review metadata even when the match is confident
    pub always_review: bool,
}

/// External collaborators of the pipeline
pub struct Collaborators {
    pub source: Box<dyn MediaSource>,
    pub identifier: Box<dyn Identifier>,
    pub cover: Box<dyn CoverArtSource>,
    pub normalizer: Box<dyn LoudnessNormalizer>,
    pub editor: Option<Box<dyn MetadataEditor>>,
}

/// Tracks the current state and reports transitions
struct StageTracker<'a> {
    current: Stage,
    progress_tx: &'a mpsc::Sender<PipelineStage>,
}

impl<'a> StageTracker<'a> {
    fn new(progress_tx: &'a mpsc::Sender<PipelineStage>) -> Self {
        Self {
            current: Stage::Resolving,
            progress_tx,
        }
    }

    async fn enter(&mut self, stage: Stage, detail: impl Into<String>) {
        debug_assert!(
            stage == self.current || self.current.next() == Some(stage),
            "invalid transition {:?} -> {:?}",
            self.current,
            stage
        );
        self.current = stage;
        let detail = detail.into();
        debug!("Stage {}: {}", stage, detail);
        let _ = self.progress_tx.send(PipelineStage::Entered { stage, detail }).await;
    }

    async fn send(&self, event: PipelineStage) {
        let _ = self.progress_tx.send(event).await;
    }
}

/// Main processing pipeline
pub struct Pipeline {
    config: PipelineConfig,
    collaborators: Collaborators,
    selector: Selector,
    tagger: Tagger,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        collaborators: Collaborators,
        selector: Selector,
    ) -> Self {
        Self {
            config,
            collaborators,
            selector,
            tagger: Tagger::new(),
        }
    }

    /// Process one request, reporting progress on `progress_tx`.
    ///
    /// The sender is dropped when the run ends, closing the channel unless
    /// the caller holds other senders.
    pub async fn run(
        &self,
        request: &SongRequest,
        progress_tx: mpsc::Sender<PipelineStage>,
    ) -> Result<PipelineOutcome> {
        let start_time = Instant::now();
        let mut tracker = StageTracker::new(&progress_tx);

        info!("Starting pipeline for: {}", request);
        let result = self.run_stages(request, &mut tracker).await;

        match &result {
            Ok(PipelineOutcome::Tagged { path, .. }) => {
                let duration = start_time.elapsed();
                info!("Pipeline complete: {} ({:.1}s)", path.display(), duration.as_secs_f32());
                tracker
                    .send(PipelineStage::Complete {
                        output: path.clone(),
                        duration,
                    })
                    .await;
            }
            Ok(PipelineOutcome::Skipped { path }) => {
                info!("Skipped, audio placed at: {}", path.display());
                tracker.send(PipelineStage::Skipped { path: path.clone() }).await;
            }
            Err(e) => {
                warn!("Pipeline failed at {}: {}", tracker.current, e);
                tracker
                    .send(PipelineStage::Failed {
                        stage: tracker.current,
                        error: e.to_string(),
                    })
                    .await;
            }
        }

        result
    }

    async fn run_stages(&self, request: &SongRequest, tracker: &mut StageTracker<'_>) -> Result<PipelineOutcome> {
        let c = &self.collaborators;

        // 1. Resolve
        tracker.enter(Stage::Resolving, request.to_string()).await;
        let handle = c.source.resolve(request)?;

        // Scratch area, removed on drop unless intermediates are kept
        tokio::fs::create_dir_all(&self.config.temp_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix("songtag-")
            .tempdir_in(&self.config.temp_dir)?;
        debug!("Scratch directory: {}", scratch.path().display());

        // 2. Download
        tracker.enter(Stage::Downloading, handle.to_string()).await;
        let audio = c.source.fetch(&handle, scratch.path()).await?;

        // 3. Fingerprint and identify
        tracker.enter(Stage::Fingerprinting, audio.title.clone()).await;
        let fingerprint = c.identifier.fingerprint(&audio.path).await?;
        let candidates = c.identifier.identify(&fingerprint).await?;

        // 4. Select
        tracker
            .enter(Stage::Selecting, format!("{} candidates", candidates.len()))
            .await;
        let metadata = match self.selector.select(&candidates, Some(&audio.title)) {
            Ok(selection) => {
                let metadata = selection.candidate.metadata;
                info!(
                    "Selected {} (score {:.2}, title similarity {})",
                    metadata, selection.candidate.score, selection.title_similarity
                );
                if self.config.always_review {
                    self.review(&audio, &fingerprint, metadata, true).await?
                } else {
                    metadata
                }
            }
            Err(uncertain) => match self.fall_back(&audio, &fingerprint, uncertain).await? {
                Some(metadata) => metadata,
                None => {
                    let path = self.skip(&audio)?;
                    return Ok(PipelineOutcome::Skipped { path });
                }
            },
        };

        // 5. Cover art
        tracker
            .enter(Stage::FetchingArt, format!("{} / {}", metadata.artist, metadata.album))
            .await;
        let cover = if self.config.fetch_cover {
            let cover = c.cover.search_image(&metadata).await;
            if cover.is_none() {
                warn!("Could not get cover art for {}", metadata);
            }
            cover
        } else {
            None
        };

        // 6. Normalize
        tracker
            .enter(Stage::Normalizing, format!("{:.1} LUFS", c.normalizer.target_lufs()))
            .await;
        let normalized = scratch.path().join("normalized.mp3");
        c.normalizer.normalize(&audio.path, &normalized).await?;

        // Kept audio is placed first so a failure here leaves no tagged output
        if self.config.keep_intermediate {
            self.keep_download(&audio)?;
        }

        // 7. Tag and write
        let output_dir = self.config.output_dir.clone();
        tracker
            .enter(
                Stage::Tagging,
                output_dir.join(tagger::output_file_name(&metadata)).display().to_string(),
            )
            .await;
        let tagger = self.tagger;
        let tag_metadata = metadata.clone();
        let path = tokio::task::spawn_blocking(move || {
            tagger.write(&normalized, &output_dir, &tag_metadata, cover.as_ref())
        })
        .await
        .map_err(|e| SongTagError::Io(std::io::Error::other(e)))??;

        tracker.enter(Stage::Done, path.display().to_string()).await;
        Ok(PipelineOutcome::Tagged { path, metadata })
    }

    /// Apply the fallback strategy; `None` means the song is skipped
    async fn fall_back(
        &self,
        audio: &DownloadedAudio,
        fingerprint: &Fingerprint,
        uncertain: NoConfidentMatch,
    ) -> Result<Option<TrackMetadata>> {
        warn!("Low confidence for {}: best candidate {}", audio.title, uncertain.describe());

        match self.config.fallback {
            FallbackStrategy::Fail => Err(SongTagError::NoConfidentMatch {
                best: uncertain.describe(),
            }),
            FallbackStrategy::Skip => Ok(None),
            FallbackStrategy::Filename => {
                let metadata = metadata_from_title(&audio.title);
                info!("Using metadata derived from title: {}", metadata);
                Ok(Some(metadata))
            }
            FallbackStrategy::Prompt => {
                if self.collaborators.editor.is_none() {
                    return Err(SongTagError::NoConfidentMatch {
                        best: uncertain.describe(),
                    });
                }
                let proposed = uncertain
                    .best
                    .map(|s| s.candidate.metadata)
                    .unwrap_or_else(|| metadata_from_title(&audio.title));
                self.review(audio, fingerprint, proposed, false).await.map(Some)
            }
        }
    }

    async fn review(
        &self,
        audio: &DownloadedAudio,
        fingerprint: &Fingerprint,
        proposed: TrackMetadata,
        confident: bool,
    ) -> Result<TrackMetadata> {
        let Some(editor) = self.collaborators.editor.as_ref() else {
            return Ok(proposed);
        };

        let edit = editor.review(&audio.title, &proposed, confident).await?;
        debug!("Using reviewed metadata: {}", edit.metadata);

        if edit.submit {
            // Submission helps the service, not this run
            if let Err(e) = self.collaborators.identifier.submit(fingerprint, &edit.metadata).await {
                warn!("AcoustID submission failed: {}", e);
            }
        }

        Ok(edit.metadata)
    }

    fn skip(&self, audio: &DownloadedAudio) -> Result<PathBuf> {
        let destination = self.config.skip_dir.join(raw_file_name(audio));
        tagger::place_copy(&audio.path, &destination)?;
        Ok(destination)
    }

    fn keep_download(&self, audio: &DownloadedAudio) -> Result<()> {
        let destination = self.config.download_dir.join(raw_file_name(audio));
        tagger::place_copy(&audio.path, &destination)?;
        debug!("Kept intermediate audio at: {}", destination.display());
        Ok(())
    }
}

/// Name for raw audio placed outside the scratch area
fn raw_file_name(audio: &DownloadedAudio) -> String {
    let extension = audio
        .path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp3");
    format!("{}.{}", tagger::sanitize_filename(&audio.title), extension)
}

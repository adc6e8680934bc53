use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::args::RunOptions;
use crate::prompt::{ActiveProgress, StdinEditor};
use songtag_core::{
    acoustid::AcoustIdClient,
    config::{Config, CoverSourceKind, Credentials},
    cover::{CoverArtArchive, CoverArtFetcher, CoverArtSource, NoCoverArt, Recompressor, Sacad},
    downloader::Downloader,
    error::ServiceError,
    fallback::{FallbackStrategy, MetadataEditor},
    fingerprint::Fpcalc,
    matcher::FingerprintMatcher,
    normalizer::Normalizer,
    pipeline::{Collaborators, Pipeline, PipelineConfig, PipelineOutcome, PipelineStage},
    selector::Selector,
    SongRequest, SongTagError,
};

pub async fn run(requests: &[String], options: &RunOptions, config_path: Option<&Path>) -> Result<()> {
    let (config, credentials) = prepare(options, config_path)?;
    debug!("Using credentials: {:?}", credentials);

    let requests = collect_requests(requests, options).await?;
    if requests.is_empty() {
        println!("No requests given");
        return Ok(());
    }

    let progress = ActiveProgress::default();
    let pipeline = build_pipeline(&config, credentials, options, &progress)?;
    let total = requests.len();
    let mut failures = 0;

    for (index, request) in requests.iter().enumerate() {
        if total > 1 {
            info!("[{}/{}] {}", index + 1, total, request);
        }

        match process(&pipeline, request, &progress).await {
            Ok(PipelineOutcome::Tagged { path, .. }) => println!("Output: {}", path.display()),
            Ok(PipelineOutcome::Skipped { path }) => println!("Skipped: {}", path.display()),
            Err(e) => {
                failures += 1;
                eprintln!("error[{}]: {}: {}", e.category(), request, e);
            }
        }
    }

    if total > 1 {
        println!("\n{} succeeded, {} failed", total - failures, failures);
    }
    if failures > 0 {
        bail!("{} of {} requests failed", failures, total);
    }
    Ok(())
}

/// Configuration and API keys; a failure here stops the run before any request
fn prepare(options: &RunOptions, config_path: Option<&Path>) -> songtag_core::Result<(Config, Credentials)> {
    let mut config = Config::load(config_path)?;
    apply_overrides(&mut config, options);
    config.validate()?;

    let credentials = Credentials::from_env()?;
    Ok((config, credentials))
}

fn apply_overrides(config: &mut Config, options: &RunOptions) {
    if let Some(dir) = &options.output_directory {
        config.output.directory = dir.clone();
    }
    if let Some(dir) = &options.download_directory {
        config.output.download_directory = dir.clone();
    }
    if let Some(dir) = &options.skip_directory {
        config.output.skip_directory = dir.clone();
    }
    if let Some(threshold) = options.threshold {
        config.selection.min_score = threshold;
    }
    if let Some(similarity) = options.min_similarity {
        config.selection.min_title_similarity = similarity;
    }
    if let Some(lufs) = options.lufs {
        config.normalize.target_lufs = lufs;
    }
    if let Some(source) = options.cover_source {
        config.cover.source = source.into();
    }
    if options.no_cover {
        config.cover.source = CoverSourceKind::None;
    }
}

async fn collect_requests(positional: &[String], options: &RunOptions) -> Result<Vec<SongRequest>> {
    let mut raw: Vec<String> = positional.to_vec();

    if let Some(input) = &options.input {
        let content = fs::read_to_string(input)
            .await
            .with_context(|| format!("Failed to read input file {}", input.display()))?;
        raw.extend(
            content
                .lines()
                .map(|l| l.trim())
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from),
        );
    }

    Ok(raw
        .into_iter()
        .map(|r| {
            if options.files {
                SongRequest::local_file(r)
            } else {
                SongRequest::remote(r)
            }
        })
        .collect())
}

fn build_pipeline(
    config: &Config,
    credentials: Credentials,
    options: &RunOptions,
    progress: &ActiveProgress,
) -> Result<Pipeline> {
    let can_submit = credentials.user_key.is_some();
    let client = AcoustIdClient::new(&config.acoustid, credentials).map_err(SongTagError::from)?;
    let timeout = Duration::from_secs(config.acoustid.timeout_secs);

    let cover: Box<dyn CoverArtSource> = match config.cover.source {
        CoverSourceKind::CoverArtArchive => Box::new(
            CoverArtArchive::new(config.cover.size, timeout)
                .map_err(|e| SongTagError::from(ServiceError::Network(e.to_string())))?,
        ),
        CoverSourceKind::Sacad => Box::new(Sacad::new(
            config.sacad_path(),
            config.cover.size,
            options.extra_sacad.clone(),
        )),
        CoverSourceKind::None => Box::new(NoCoverArt),
    };
    let recompressor = config
        .cover
        .recompress
        .then(|| Recompressor::new(config.jpegtran_path()));

    let fallback: FallbackStrategy = options.on_uncertain.into();
    let editor: Option<Box<dyn MetadataEditor>> =
        if options.manual || fallback == FallbackStrategy::Prompt {
            Some(Box::new(StdinEditor::new(can_submit, progress.clone())))
        } else {
            None
        };

    let collaborators = Collaborators {
        source: Box::new(Downloader::new(config.yt_dlp_path(), options.extra_yt_dlp.clone())),
        identifier: Box::new(FingerprintMatcher::new(Fpcalc::new(config.fpcalc_path()), client)),
        cover: Box::new(CoverArtFetcher::new(cover, recompressor)),
        normalizer: Box::new(Normalizer::new(
            config.ffmpeg_path(),
            &config.normalize,
            options.extra_ffmpeg.clone(),
        )),
        editor,
    };

    let pipeline_config = PipelineConfig {
        output_dir: config.output.directory.clone(),
        download_dir: config.output.download_directory.clone(),
        skip_dir: config.output.skip_directory.clone(),
        temp_dir: config.temp_dir(),
        keep_intermediate: options.keep,
        fetch_cover: config.cover.source != CoverSourceKind::None,
        fallback,
        always_review: options.manual,
    };

    Ok(Pipeline::new(
        pipeline_config,
        collaborators,
        Selector::from_config(&config.selection),
    ))
}

async fn process(
    pipeline: &Pipeline,
    request: &SongRequest,
    progress: &ActiveProgress,
) -> songtag_core::Result<PipelineOutcome> {
    let (tx, mut rx) = mpsc::channel(32);

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    progress.set(Some(pb.clone()));

    let progress_handle = tokio::spawn(async move {
        while let Some(stage) = rx.recv().await {
            match stage {
                PipelineStage::Entered { stage, detail } => {
                    pb.set_message(format!("{}: {}", stage, truncate(&detail, 60)));
                }
                PipelineStage::Complete { output, duration } => {
                    pb.finish_with_message(format!(
                        "Done: {} ({:.1}s)",
                        output.display(),
                        duration.as_secs_f32()
                    ));
                }
                PipelineStage::Skipped { path } => {
                    pb.finish_with_message(format!("Skipped: {}", path.display()));
                }
                PipelineStage::Failed { stage, error } => {
                    pb.abandon_with_message(format!("Failed at {}: {}", stage, error));
                }
            }
        }
    });

    let result = pipeline.run(request, tx).await;
    progress.set(None);

    // Spinner task ends once the sender is dropped
    let _ = progress_handle.await;
    result
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Cli;
    use clap::Parser;

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("Sigur Rós - Hoppípolla", 10), "Sigur R...");
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::try_parse_from(["songtag", "q", "-o", "out", "--threshold", "0.8", "--no-cover"]).unwrap();
        let mut config = Config::default();
        apply_overrides(&mut config, &cli.options);
        assert_eq!(config.output.directory, Path::new("out"));
        assert_eq!(config.selection.min_score, 0.8);
        assert_eq!(config.cover.source, CoverSourceKind::None);
    }

    #[test]
    fn test_invalid_override_is_a_configuration_error() {
        let cli = Cli::try_parse_from(["songtag", "q", "--threshold", "1.5"]).unwrap();
        let err = prepare(&cli.options, None).unwrap_err();
        assert_eq!(err.category(), "ConfigurationError");
    }

    #[test]
    fn test_missing_config_file_is_a_configuration_error() {
        let cli = Cli::try_parse_from(["songtag", "q"]).unwrap();
        let err = prepare(&cli.options, Some(Path::new("/nonexistent/songtag.toml"))).unwrap_err();
        assert_eq!(err.category(), "ConfigurationError");
    }

    #[tokio::test]
    async fn test_collect_requests_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("songs.txt");
        std::fs::write(&list, "# favourites\nband b song a\n\nhttps://example.com/v\n").unwrap();

        let cli = Cli::try_parse_from(["songtag", "first", "--input", list.to_str().unwrap()]).unwrap();
        let requests = collect_requests(&cli.requests, &cli.options).await.unwrap();
        let raw: Vec<&str> = requests.iter().map(|r| r.as_str()).collect();
        assert_eq!(raw, vec!["first", "band b song a", "https://example.com/v"]);
        assert!(!requests[0].is_local());
    }
}

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use songtag_core::config::CoverSourceKind;
use songtag_core::fallback::FallbackStrategy;

#[derive(Parser)]
#[command(name = "songtag")]
#[command(author, version, about = "Turn online videos into tagged, loudness-normalized MP3 files")]
#[command(propagate_version = true)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Video URLs or search terms (file paths with --files)
    #[arg(value_name = "REQUEST")]
    pub requests: Vec<String>,

    #[command(flatten)]
    pub options: RunOptions,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check external tools and API keys
    Doctor,

    /// Show effective configuration
    Config,
}

#[derive(clap::Args, Clone, Debug)]
pub struct RunOptions {
    /// Read additional requests from a file, one per line
    #[arg(short, long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Treat requests as local audio files
    #[arg(long)]
    pub files: bool,

    /// Directory for tagged songs [default: finished]
    #[arg(short, long)]
    pub output_directory: Option<PathBuf>,

    /// Directory for kept raw downloads, with --keep [default: downloaded]
    #[arg(long)]
    pub download_directory: Option<PathBuf>,

    /// Directory for unmatched songs, with --on-uncertain skip [default: skipped]
    #[arg(long)]
    pub skip_directory: Option<PathBuf>,

    /// Minimum AcoustID score (0.0 - 1.0) to accept a match [default: 0.5]
    #[arg(short, long)]
    pub threshold: Option<f64>,

    /// Minimum title similarity (0 - 100) to accept a match [default: 0]
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub min_similarity: Option<u8>,

    /// What to do when no match is confident
    #[arg(long, value_enum, default_value = "prompt")]
    pub on_uncertain: UncertainAction,

    /// Review metadata of every song, even confident matches
    #[arg(short, long)]
    pub manual: bool,

    /// Target loudness in LUFS [default: -14]
    #[arg(long, allow_hyphen_values = true)]
    pub lufs: Option<f32>,

    /// Where to look for cover art [default: cover-art-archive]
    #[arg(long, value_enum)]
    pub cover_source: Option<CoverSource>,

    /// Do not embed cover art
    #[arg(long)]
    pub no_cover: bool,

    /// Keep the raw downloaded audio
    #[arg(short, long)]
    pub keep: bool,

    /// Extra arguments for yt-dlp
    #[arg(long, num_args = 1.., allow_hyphen_values = true, value_name = "ARG")]
    pub extra_yt_dlp: Vec<String>,

    /// Extra arguments for the ffmpeg normalization pass
    #[arg(long, num_args = 1.., allow_hyphen_values = true, value_name = "ARG")]
    pub extra_ffmpeg: Vec<String>,

    /// Extra arguments for sacad
    #[arg(long, num_args = 1.., allow_hyphen_values = true, value_name = "ARG")]
    pub extra_sacad: Vec<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum UncertainAction {
    /// Ask for artist, title and album
    Prompt,
    /// Move the raw audio to the skip directory
    Skip,
    /// Derive artist and title from the video title
    Filename,
    /// Report an error
    Fail,
}

impl From<UncertainAction> for FallbackStrategy {
    fn from(action: UncertainAction) -> Self {
        match action {
            UncertainAction::Prompt => FallbackStrategy::Prompt,
            UncertainAction::Skip => FallbackStrategy::Skip,
            UncertainAction::Filename => FallbackStrategy::Filename,
            UncertainAction::Fail => FallbackStrategy::Fail,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoverSource {
    /// Cover Art Archive, by release group
    CoverArtArchive,
    /// Search through the sacad tool
    Sacad,
    /// No cover art
    None,
}

impl From<CoverSource> for CoverSourceKind {
    fn from(source: CoverSource) -> Self {
        match source {
            CoverSource::CoverArtArchive => CoverSourceKind::CoverArtArchive,
            CoverSource::Sacad => CoverSourceKind::Sacad,
            CoverSource::None => CoverSourceKind::None,
        }
    }
}

//! songtag-core: identify, normalize and tag songs fetched from video sites

pub mod acoustid;
pub mod config;
pub mod cover;
pub mod downloader;
pub mod error;
pub mod fallback;
pub mod fingerprint;
pub mod matcher;
pub mod normalizer;
pub mod pipeline;
pub mod resolver;
pub mod selector;
pub mod tagger;
pub mod track;

pub use config::{Config, Credentials};
pub use error::{Result, SongTagError};
pub use pipeline::{Pipeline, PipelineConfig, PipelineOutcome, PipelineStage, Stage};
pub use resolver::SongRequest;
pub use track::TrackMetadata;

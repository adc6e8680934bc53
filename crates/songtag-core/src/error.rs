//! Error types for songtag-core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SongTagError>;

#[derive(Error, Debug)]
pub enum SongTagError {
    #[error("Resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("Fingerprinting failed: {0}")]
    Fingerprint(#[from] FingerprintError),

    #[error("Identification service failed: {0}")]
    Service(#[from] ServiceError),

    #[error("No confident match (best candidate: {best})")]
    NoConfidentMatch { best: String },

    #[error("Normalization failed: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("Writing output failed: {0}")]
    Write(#[from] WriteError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SongTagError {
    /// Stable category name printed next to failures
    pub fn category(&self) -> &'static str {
        match self {
            SongTagError::Resolution(_) => "ResolutionError",
            SongTagError::Download(_) => "DownloadError",
            SongTagError::Fingerprint(_) => "FingerprintError",
            SongTagError::Service(_) => "ServiceError",
            SongTagError::NoConfidentMatch { .. } => "NoConfidentMatch",
            SongTagError::Normalize(_) => "NormalizationError",
            SongTagError::Write(_) => "WriteError",
            SongTagError::Config(_) => "ConfigurationError",
            SongTagError::Io(_) => "IoError",
        }
    }

    /// Only a missing confident match may be handled by a fallback strategy
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SongTagError::NoConfidentMatch { .. })
    }
}

#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("Empty song request")]
    Empty,

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Local file not found: {0}")]
    FileNotFound(String),
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("yt-dlp not found. Install with: pip install yt-dlp")]
    YtDlpNotFound,

    #[error("yt-dlp failed with exit code {code:?}: {output}")]
    YtDlpFailed { code: Option<i32>, output: String },

    #[error("Video unavailable or private: {0}")]
    VideoUnavailable(String),

    #[error("No audio stream available")]
    NoAudioStream,

    #[error("Failed to parse metadata: {0}")]
    MetadataParse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum FingerprintError {
    #[error("fpcalc not found. Install chromaprint (fpcalc)")]
    FpcalcNotFound,

    #[error("fpcalc could not decode audio (exit code {code:?}): {output}")]
    DecodeFailed { code: Option<i32>, output: String },

    #[error("Failed to parse fpcalc output: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Rate limit or quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Service temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("Service rejected request (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("HTTP error {0}: {1}")]
    Http(u16, String),

    #[error("Malformed response: {0}")]
    Parse(String),

    #[error("User API key required for submissions")]
    MissingUserKey,
}

impl ServiceError {
    /// Whether a retry has a chance of succeeding
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Network(_) | ServiceError::QuotaExceeded(_) | ServiceError::Unavailable(_) => {
                true
            }
            ServiceError::Http(status, _) => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("FFmpeg not found")]
    FfmpegNotFound,

    #[error("FFmpeg normalization failed with exit code {code:?}: {output}")]
    FfmpegFailed { code: Option<i32>, output: String },

    #[error("Failed to parse loudness stats")]
    LoudnessParseError,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Failed to write tags: {0}")]
    Tag(#[from] id3::Error),

    #[error("Failed to move output into place: {0}")]
    Persist(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    LoadError(String),

    #[error("Invalid config value: {0}")]
    InvalidValue(String),

    #[error("Missing required environment variable {0}")]
    MissingApiKey(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

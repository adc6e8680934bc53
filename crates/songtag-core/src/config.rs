//! Configuration management for songtag

use crate::error::ConfigError;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const APPLICATION_KEY_VAR: &str = "ACOUSTID_APPLICATION_API_KEY";
pub const USER_KEY_VAR: &str = "ACOUSTID_USER_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub paths: PathsConfig,
    pub acoustid: AcoustIdConfig,
    pub selection: SelectionConfig,
    pub normalize: NormalizeConfig,
    pub cover: CoverConfig,
    pub output: OutputConfig,
    pub temp: TempConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Path to yt-dlp binary (auto-detected if not set)
    pub yt_dlp: Option<PathBuf>,
    /// Path to FFmpeg binary (auto-detected if not set)
    pub ffmpeg: Option<PathBuf>,
    /// Path to chromaprint's fpcalc binary (auto-detected if not set)
    pub fpcalc: Option<PathBuf>,
    /// Path to sacad binary (auto-detected if not set)
    pub sacad: Option<PathBuf>,
    /// Path to jpegtran binary used for lossless recompression
    pub jpegtran: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcoustIdConfig {
    /// Base URL of the AcoustID web service
    pub base_url: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Retries for transient failures (network errors, 5xx, rate limiting)
    pub max_retries: u32,
    /// Delay before the first retry, doubled on every further attempt
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Minimum acoustic score (0.0 - 1.0) for a candidate to be accepted
    pub min_score: f64,
    /// Minimum fuzzy similarity (0 - 100) between candidate and source title
    pub min_title_similarity: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeConfig {
    /// Target LUFS level (default: -14.0)
    pub target_lufs: f32,
    /// True peak limit (default: -1.0)
    pub true_peak: f32,
    /// Loudness range (default: 11.0)
    pub lra: f32,
    /// MP3 bitrate of the normalized output
    pub bitrate: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CoverSourceKind {
    CoverArtArchive,
    Sacad,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverConfig {
    /// Where cover art is searched
    pub source: CoverSourceKind,
    /// Requested edge length in pixels
    pub size: u32,
    /// Run lossless JPEG recompression on fetched covers
    pub recompress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving tagged files
    pub directory: PathBuf,
    /// Directory receiving raw downloads when they are kept
    pub download_directory: PathBuf,
    /// Directory receiving audio skipped for lack of a confident match
    pub skip_directory: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TempConfig {
    /// Custom temp directory (uses system temp if not set)
    pub directory: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            acoustid: AcoustIdConfig {
                base_url: "https://api.acoustid.org/v2".to_string(),
                timeout_secs: 30,
                max_retries: 2,
                retry_backoff_ms: 1000,
            },
            selection: SelectionConfig {
                min_score: 0.5,
                min_title_similarity: 0,
            },
            normalize: NormalizeConfig {
                target_lufs: -14.0,
                true_peak: -1.0,
                lra: 11.0,
                bitrate: "320k".to_string(),
            },
            cover: CoverConfig {
                source: CoverSourceKind::CoverArtArchive,
                size: 600,
                recompress: true,
            },
            output: OutputConfig {
                directory: PathBuf::from("finished"),
                download_directory: PathBuf::from("downloaded"),
                skip_directory: PathBuf::from("skipped"),
            },
            temp: TempConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Load from default config directory
        if let Some(config_dir) = dirs::config_dir() {
            let default_config = config_dir.join("songtag/config.toml");
            if default_config.exists() {
                figment = figment.merge(Toml::file(&default_config));
            }
        }

        // Load from specified config file
        if let Some(path) = config_file {
            if !path.exists() {
                return Err(ConfigError::LoadError(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        // Nested keys use a double underscore: SONGTAG_SELECTION__MIN_SCORE
        figment = figment.merge(Env::prefixed("SONGTAG_").split("__"));

        let config: Config = figment
            .extract()
            .map_err(|e| ConfigError::LoadError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.selection.min_score) {
            return Err(ConfigError::InvalidValue(format!(
                "selection.min_score must be within 0.0..=1.0, got {}",
                self.selection.min_score
            )));
        }
        if self.selection.min_title_similarity > 100 {
            return Err(ConfigError::InvalidValue(format!(
                "selection.min_title_similarity must be within 0..=100, got {}",
                self.selection.min_title_similarity
            )));
        }
        if self.cover.size == 0 {
            return Err(ConfigError::InvalidValue("cover.size must be positive".to_string()));
        }
        Ok(())
    }

    pub fn yt_dlp_path(&self) -> Option<PathBuf> {
        locate(self.paths.yt_dlp.as_ref(), "yt-dlp")
    }

    pub fn ffmpeg_path(&self) -> Option<PathBuf> {
        locate(self.paths.ffmpeg.as_ref(), "ffmpeg")
    }

    pub fn fpcalc_path(&self) -> Option<PathBuf> {
        locate(self.paths.fpcalc.as_ref(), "fpcalc")
    }

    pub fn sacad_path(&self) -> Option<PathBuf> {
        locate(self.paths.sacad.as_ref(), "sacad")
    }

    pub fn jpegtran_path(&self) -> Option<PathBuf> {
        locate(self.paths.jpegtran.as_ref(), "jpegtran")
    }

    /// Get temp directory
    pub fn temp_dir(&self) -> PathBuf {
        self.temp.directory.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidValue(e.to_string()))
    }
}

fn locate(configured: Option<&PathBuf>, binary: &str) -> Option<PathBuf> {
    match configured {
        Some(path) => Some(path.clone()),
        None => which::which(binary).ok(),
    }
}

/// AcoustID API keys
#[derive(Clone)]
pub struct Credentials {
    pub application_key: String,
    pub user_key: Option<String>,
}

impl Credentials {
    /// Read API keys from the environment, loading `.env` from the working
    /// directory first when one exists
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => debug!("Loaded environment file: {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(ConfigError::LoadError(format!("invalid .env file: {}", e))),
        }

        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let application_key =
            non_empty(APPLICATION_KEY_VAR).ok_or(ConfigError::MissingApiKey(APPLICATION_KEY_VAR))?;

        Ok(Self {
            application_key,
            user_key: non_empty(USER_KEY_VAR),
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("application_key", &mask(&self.application_key))
            .field("user_key", &self.user_key.as_deref().map(mask))
            .finish()
    }
}

/// Show only the first characters of a secret
pub fn mask(secret: &str) -> String {
    let visible: String = secret.chars().take(3).collect();
    format!("{}***", visible)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.selection.min_score, 0.5);
        assert_eq!(config.output.directory, PathBuf::from("finished"));
    }

    #[test]
    fn test_rejects_out_of_range_score() {
        let mut config = Config::default();
        config.selection.min_score = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_credentials_require_application_key() {
        let result = Credentials::from_lookup(|_| None);
        assert!(matches!(
            result,
            Err(ConfigError::MissingApiKey(APPLICATION_KEY_VAR))
        ));

        let blank = Credentials::from_lookup(|_| Some("   ".to_string()));
        assert!(blank.is_err());
    }

    #[test]
    fn test_credentials_user_key_optional() {
        let creds = Credentials::from_lookup(|name| {
            (name == APPLICATION_KEY_VAR).then(|| "app-key".to_string())
        })
        .unwrap();
        assert_eq!(creds.application_key, "app-key");
        assert!(creds.user_key.is_none());
        assert!(!format!("{:?}", creds).contains("app-key"));
    }

    #[test]
    fn test_config_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[selection]\nmin_score = 0.8\n\n[cover]\nsource = \"sacad\"\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.selection.min_score, 0.8);
        assert_eq!(config.cover.source, CoverSourceKind::Sacad);
        assert_eq!(config.normalize.target_lufs, -14.0);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let result = Config::load(Some(Path::new("/nonexistent/songtag.toml")));
        assert!(matches!(result, Err(ConfigError::LoadError(_))));
    }
}

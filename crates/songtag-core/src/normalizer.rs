//! LUFS loudness normalization using FFmpeg

use crate::config::NormalizeConfig;
use crate::error::NormalizeError;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// Produces a loudness-normalized copy of an audio file
#[async_trait]
pub trait LoudnessNormalizer: Send + Sync {
    fn target_lufs(&self) -> f32;

    async fn normalize(&self, input: &Path, output: &Path) -> Result<(), NormalizeError>;
}

#[derive(Debug)]
pub struct Normalizer {
    ffmpeg_path: Option<PathBuf>,
    target_lufs: f32,
    true_peak: f32,
    lra: f32,
    bitrate: String,
    extra_args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LoudnormStats {
    input_i: String,
    input_tp: String,
    input_lra: String,
    input_thresh: String,
    target_offset: String,
}

impl Normalizer {
    pub fn new(ffmpeg_path: Option<PathBuf>, config: &NormalizeConfig, extra_args: Vec<String>) -> Self {
        Self {
            ffmpeg_path,
            target_lufs: config.target_lufs,
            true_peak: config.true_peak,
            lra: config.lra,
            bitrate: config.bitrate.clone(),
            extra_args: crate::downloader::trim_extra_args(extra_args),
        }
    }

    fn ffmpeg(&self) -> Result<&Path, NormalizeError> {
        self.ffmpeg_path.as_deref().ok_or(NormalizeError::FfmpegNotFound)
    }

    async fn measure_loudness(&self, input: &Path) -> Result<LoudnormStats, NormalizeError> {
        let filter = format!(
            "loudnorm=I={}:TP={}:LRA={}:print_format=json",
            self.target_lufs, self.true_peak, self.lra
        );

        let output = Command::new(self.ffmpeg()?)
            .args(["-hide_banner", "-nostdin", "-i"])
            .arg(input)
            .args(["-af", &filter, "-f", "null", "-"])
            .output()
            .await?;

        // loudnorm prints its JSON report to stderr
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(NormalizeError::FfmpegFailed {
                code: output.status.code(),
                output: last_lines(&stderr, 5),
            });
        }

        let stats = parse_loudnorm_output(&stderr)?;
        debug!(
            "Measured loudness: I={}, TP={}, LRA={}",
            stats.input_i, stats.input_tp, stats.input_lra
        );

        Ok(stats)
    }

    async fn apply_normalization(
        &self,
        input: &Path,
        output: &Path,
        stats: &LoudnormStats,
    ) -> Result<(), NormalizeError> {
        let filter = format!(
            "loudnorm=I={}:TP={}:LRA={}:\
             measured_I={}:measured_TP={}:measured_LRA={}:measured_thresh={}:\
             offset={}:linear=true",
            self.target_lufs, self.true_peak, self.lra,
            stats.input_i, stats.input_tp, stats.input_lra,
            stats.input_thresh, stats.target_offset
        );

        let mut cmd = Command::new(self.ffmpeg()?);
        cmd.args(["-hide_banner", "-nostdin", "-loglevel", "error", "-i"])
            .arg(input)
            .args(["-af", &filter])
            // Audio only; cover streams are re-added by the tagger
            .args(["-map", "0:a:0", "-map_metadata", "-1"])
            .args(["-c:a", "libmp3lame", "-b:a", &self.bitrate, "-ar", "44100"])
            .args(&self.extra_args)
            .arg("-y")
            .arg(output);
        debug!("Running: {:?}", cmd);

        let result = cmd.output().await?;
        if !result.status.success() {
            return Err(NormalizeError::FfmpegFailed {
                code: result.status.code(),
                output: last_lines(&String::from_utf8_lossy(&result.stderr), 5),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl LoudnessNormalizer for Normalizer {
    fn target_lufs(&self) -> f32 {
        self.target_lufs
    }

    /// Apply EBU R128 loudness normalization (two-pass for accuracy)
    async fn normalize(&self, input: &Path, output: &Path) -> Result<(), NormalizeError> {
        info!("Normalizing to {:.1} LUFS", self.target_lufs);

        // First pass: measure loudness
        let stats = self.measure_loudness(input).await?;

        // Second pass: apply normalization with measured values
        self.apply_normalization(input, output, &stats).await?;

        debug!("Normalized to: {}", output.display());
        Ok(())
    }
}

fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(count)..].join("\n")
}

fn parse_loudnorm_output(stderr: &str) -> Result<LoudnormStats, NormalizeError> {
    // The report is the last JSON block in the output:
    // {
    //     "input_i" : "-14.52",
    //     "input_tp" : "-0.95",
    //     ...
    // }
    let json_end = stderr.rfind('}').ok_or(NormalizeError::LoudnessParseError)?;
    let json_start = stderr[..json_end].rfind('{').ok_or(NormalizeError::LoudnessParseError)?;

    let json_str = &stderr[json_start..=json_end];

    serde_json::from_str(json_str).map_err(|_| NormalizeError::LoudnessParseError)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOUDNORM_REPORT: &str = r#"
Input #0, mp3, from 'song.mp3':
  Duration: 00:03:35.47, start: 0.025057, bitrate: 320 kb/s
[Parsed_loudnorm_0 @ 0x5581]
{
	"input_i" : "-9.87",
	"input_tp" : "0.31",
	"input_lra" : "5.40",
	"input_thresh" : "-19.97",
	"output_i" : "-14.02",
	"output_tp" : "-1.00",
	"output_lra" : "4.90",
	"output_thresh" : "-24.10",
	"normalization_type" : "dynamic",
	"target_offset" : "0.02"
}
"#;

    #[test]
    fn test_parse_loudnorm_report() {
        let stats = parse_loudnorm_output(LOUDNORM_REPORT).unwrap();
        assert_eq!(stats.input_i, "-9.87");
        assert_eq!(stats.input_thresh, "-19.97");
        assert_eq!(stats.target_offset, "0.02");
    }

    #[test]
    fn test_parse_loudnorm_without_report() {
        assert!(matches!(
            parse_loudnorm_output("Invalid data found when processing input"),
            Err(NormalizeError::LoudnessParseError)
        ));
    }

    #[test]
    fn test_last_lines() {
        assert_eq!(last_lines("a\nb\nc", 2), "b\nc");
        assert_eq!(last_lines("a", 5), "a");
    }

    #[tokio::test]
    async fn test_missing_ffmpeg() {
        let normalizer = Normalizer::new(None, &crate::Config::default().normalize, Vec::new());
        assert_eq!(normalizer.target_lufs(), -14.0);
        let result = normalizer.normalize(Path::new("in.mp3"), Path::new("out.mp3")).await;
        assert!(matches!(result, Err(NormalizeError::FfmpegNotFound)));
    }
}

//! Chromaprint fingerprints computed by `fpcalc`

use crate::error::FingerprintError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// Acoustic signature of an audio file, used only as a lookup key
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Fingerprint {
    /// Length of the decoded audio in seconds
    pub duration: f64,
    /// Compressed, base64 encoded Chromaprint fingerprint
    pub fingerprint: String,
}

impl Fingerprint {
    /// AcoustID expects whole seconds
    pub fn duration_secs(&self) -> u64 {
        self.duration.round().max(0.0) as u64
    }
}

#[derive(Debug)]
pub struct Fpcalc {
    fpcalc_path: Option<PathBuf>,
}

impl Fpcalc {
    pub fn new(fpcalc_path: Option<PathBuf>) -> Self {
        Self { fpcalc_path }
    }

    pub async fn fingerprint(&self, audio: &Path) -> Result<Fingerprint, FingerprintError> {
        let fpcalc = self.fpcalc_path.as_ref().ok_or(FingerprintError::FpcalcNotFound)?;
        info!("Fingerprinting {}", audio.display());

        let output = Command::new(fpcalc).arg("-json").arg(audio).output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("fpcalc stderr: {}", stderr);
            return Err(FingerprintError::DecodeFailed {
                code: output.status.code(),
                output: stderr.trim().to_string(),
            });
        }

        parse_fpcalc_output(&String::from_utf8_lossy(&output.stdout))
    }
}

fn parse_fpcalc_output(stdout: &str) -> Result<Fingerprint, FingerprintError> {
    let fingerprint: Fingerprint =
        serde_json::from_str(stdout.trim()).map_err(|e| FingerprintError::Parse(e.to_string()))?;

    if fingerprint.fingerprint.is_empty() || fingerprint.duration <= 0.0 {
        return Err(FingerprintError::Parse("empty fingerprint".to_string()));
    }

    debug!("Fingerprint: {:.1}s, {} chars", fingerprint.duration, fingerprint.fingerprint.len());
    Ok(fingerprint)
}

//! Audio downloader using yt-dlp

use crate::error::{DownloadError, ResolutionError};
use crate::resolver::{self, MediaHandle, SongRequest};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// Where song audio comes from
#[async_trait]
pub trait MediaSource: Send + Sync {
    fn resolve(&self, request: &SongRequest) -> Result<MediaHandle, ResolutionError>;

    /// Place the audio of `handle` inside `work_dir`
    async fn fetch(&self, handle: &MediaHandle, work_dir: &Path) -> Result<DownloadedAudio, DownloadError>;
}

/// A finished intermediate audio file
#[derive(Debug, Clone)]
pub struct DownloadedAudio {
    pub path: PathBuf,
    /// Video title or file stem; hint for matching and fallback naming
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub duration: Option<f64>,
}

#[derive(Debug)]
pub struct Downloader {
    yt_dlp_path: Option<PathBuf>,
    extra_args: Vec<String>,
}

impl Downloader {
    pub fn new(yt_dlp_path: Option<PathBuf>, extra_args: Vec<String>) -> Self {
        Self {
            yt_dlp_path,
            extra_args: trim_extra_args(extra_args),
        }
    }

    /// Download the best audio stream of `locator` and convert it to MP3
    async fn download(&self, locator: &str, work_dir: &Path) -> Result<DownloadedAudio, DownloadError> {
        let yt_dlp = self.yt_dlp_path.as_ref().ok_or(DownloadError::YtDlpNotFound)?;
        info!("Downloading audio from: {}", locator);

        // yt-dlp works inside its own staging directory; only a completed
        // file is moved to the intermediate path
        let staging = work_dir.join("download.partial");
        tokio::fs::create_dir_all(&staging).await?;
        let output_template = staging.join("%(id)s.%(ext)s");

        let mut cmd = Command::new(yt_dlp);
        cmd.args([
            "-f", "bestaudio/best",
            "--extract-audio",
            "--audio-format", "mp3",
            "--audio-quality", "0",
            "--no-playlist",
            "--dump-json",
            "--no-simulate",
            "--no-progress",
        ]);
        cmd.arg("-o").arg(&output_template);
        cmd.args(&self.extra_args);
        cmd.arg(locator);
        debug!("Running: {:?}", cmd);

        let output = cmd.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("yt-dlp stderr: {}", stderr);
            let _ = tokio::fs::remove_dir_all(&staging).await;

            if stderr.contains("Video unavailable") || stderr.contains("Private video") {
                return Err(DownloadError::VideoUnavailable(locator.to_string()));
            }

            return Err(DownloadError::YtDlpFailed {
                code: output.status.code(),
                output: stderr.trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let metadata = parse_video_metadata(&stdout)?;
        debug!("Downloaded: {} ({})", metadata.title, metadata.id);

        let staged = find_audio_file(&staging, &metadata.id)?;
        let final_path = work_dir.join(format!("{}.mp3", metadata.id));
        tokio::fs::rename(&staged, &final_path).await?;
        tokio::fs::remove_dir_all(&staging).await?;

        Ok(DownloadedAudio {
            path: final_path,
            title: metadata.title,
        })
    }

    /// Copy a local file into the work directory
    async fn copy_local(&self, source: &Path, work_dir: &Path) -> Result<DownloadedAudio, DownloadError> {
        info!("Using local audio file: {}", source.display());

        let file_name = source
            .file_name()
            .ok_or(DownloadError::NoAudioStream)?
            .to_string_lossy()
            .to_string();
        let title = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| file_name.clone());

        let partial = work_dir.join(format!("{}.partial", file_name));
        let final_path = work_dir.join(&file_name);
        tokio::fs::copy(source, &partial).await?;
        tokio::fs::rename(&partial, &final_path).await?;

        Ok(DownloadedAudio { path: final_path, title })
    }
}

#[async_trait]
impl MediaSource for Downloader {
    fn resolve(&self, request: &SongRequest) -> Result<MediaHandle, ResolutionError> {
        resolver::resolve(request)
    }

    async fn fetch(&self, handle: &MediaHandle, work_dir: &Path) -> Result<DownloadedAudio, DownloadError> {
        match handle {
            MediaHandle::Local(path) => self.copy_local(path, work_dir).await,
            remote => self.download(&remote.locator(), work_dir).await,
        }
    }
}

/// yt-dlp prints one JSON object per downloaded video; the first one wins
fn parse_video_metadata(stdout: &str) -> Result<VideoMetadata, DownloadError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with('{'))
        .ok_or_else(|| DownloadError::MetadataParse("no JSON in yt-dlp output".to_string()))?;

    serde_json::from_str(line).map_err(|e| DownloadError::MetadataParse(e.to_string()))
}

fn find_audio_file(dir: &Path, video_id: &str) -> Result<PathBuf, DownloadError> {
    let path = dir.join(format!("{}.mp3", video_id));
    if path.exists() {
        debug!("Found audio file: {}", path.display());
        Ok(path)
    } else {
        Err(DownloadError::NoAudioStream)
    }
}

/// Leading whitespace lets users pass dash-prefixed values through the CLI
pub fn trim_extra_args(args: Vec<String>) -> Vec<String> {
    args.into_iter().map(|a| a.trim_start().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_video_metadata_takes_first_object() {
        let stdout = "[info] something\n{\"id\": \"abc\", \"title\": \"Band B - Song A (Official Video)\", \"duration\": 215.0, \"ext\": \"webm\"}\n{\"id\": \"def\", \"title\": \"other\"}\n";
        let metadata = parse_video_metadata(stdout).unwrap();
        assert_eq!(metadata.id, "abc");
        assert_eq!(metadata.title, "Band B - Song A (Official Video)");
        assert_eq!(metadata.duration, Some(215.0));
    }

    #[test]
    fn test_parse_video_metadata_requires_json() {
        assert!(matches!(
            parse_video_metadata("ERROR: nothing"),
            Err(DownloadError::MetadataParse(_))
        ));
    }

    #[test]
    fn test_trim_extra_args() {
        let args = trim_extra_args(vec![" --cookies".to_string(), "file.txt".to_string()]);
        assert_eq!(args, vec!["--cookies", "file.txt"]);
    }

    #[tokio::test]
    async fn test_missing_yt_dlp_is_a_download_error() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(None, Vec::new());
        let handle = MediaHandle::Search("ytsearch1:anything".to_string());
        let result = downloader.fetch(&handle, dir.path()).await;
        assert!(matches!(result, Err(DownloadError::YtDlpNotFound)));
    }

    /// Writes an executable stand-in for yt-dlp; `body` runs with `$staging`
    /// set to the directory of the `-o` template
    #[cfg(unix)]
    fn fake_yt_dlp(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("yt-dlp");
        let script = format!(
            "#!/bin/sh\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"-o\" ]; then out=\"$2\"; fi\n  shift\ndone\nstaging=$(dirname \"$out\")\n{}\n",
            body
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_download_moves_finished_file_out_of_staging() {
        let bin_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let yt_dlp = fake_yt_dlp(
            bin_dir.path(),
            "printf 'audio' > \"$staging/abc.mp3\"\necho '[info] abc: Downloading'\necho '{\"id\": \"abc\", \"title\": \"Band B - Song A (Official Video)\"}'",
        );

        let downloader = Downloader::new(Some(yt_dlp), Vec::new());
        let handle = MediaHandle::Url(url::Url::parse("https://www.youtube.com/watch?v=abc").unwrap());
        let audio = downloader.fetch(&handle, work_dir.path()).await.unwrap();

        assert_eq!(audio.path, work_dir.path().join("abc.mp3"));
        assert_eq!(audio.title, "Band B - Song A (Official Video)");
        assert_eq!(std::fs::read(&audio.path).unwrap(), b"audio");
        assert!(!work_dir.path().join("download.partial").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_download_leaves_no_intermediate_file() {
        let bin_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let yt_dlp = fake_yt_dlp(
            bin_dir.path(),
            "printf 'half' > \"$staging/abc.mp3\"\necho 'ERROR: [youtube] abc: Video unavailable' >&2\nexit 1",
        );

        let downloader = Downloader::new(Some(yt_dlp), Vec::new());
        let handle = MediaHandle::Url(url::Url::parse("https://www.youtube.com/watch?v=abc").unwrap());
        let result = downloader.fetch(&handle, work_dir.path()).await;

        assert!(matches!(result, Err(DownloadError::VideoUnavailable(_))));
        assert!(!work_dir.path().join("abc.mp3").exists());
        assert!(!work_dir.path().join("download.partial").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_download_failure_reports_exit_code() {
        let bin_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let yt_dlp = fake_yt_dlp(bin_dir.path(), "echo 'ERROR: Unable to extract' >&2\nexit 2");

        let downloader = Downloader::new(Some(yt_dlp), Vec::new());
        let handle = MediaHandle::Search("ytsearch1:band b song a".to_string());
        let result = downloader.fetch(&handle, work_dir.path()).await;

        match result {
            Err(DownloadError::YtDlpFailed { code, output }) => {
                assert_eq!(code, Some(2));
                assert_eq!(output, "ERROR: Unable to extract");
            }
            other => panic!("unexpected result: {:?}", other.map(|a| a.path)),
        }
    }

    #[tokio::test]
    async fn test_local_file_is_copied_into_work_dir() {
        let source_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("Band B - Song A.mp3");
        std::fs::write(&source, b"fake audio").unwrap();

        let downloader = Downloader::new(None, Vec::new());
        let audio = downloader
            .fetch(&MediaHandle::Local(source.clone()), work_dir.path())
            .await
            .unwrap();

        assert_eq!(audio.title, "Band B - Song A");
        assert_eq!(audio.path, work_dir.path().join("Band B - Song A.mp3"));
        assert_eq!(std::fs::read(&audio.path).unwrap(), b"fake audio");
        assert!(source.exists());
        assert!(!work_dir.path().join("Band B - Song A.mp3.partial").exists());
    }
}

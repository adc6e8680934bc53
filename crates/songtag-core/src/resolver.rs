//! Song request resolution

use crate::error::ResolutionError;
use std::path::PathBuf;
use url::Url;

/// A user supplied reference to a song
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongRequest {
    raw: String,
    local: bool,
}

impl SongRequest {
    /// URL or search term handed to the download tool
    pub fn remote(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            local: false,
        }
    }

    /// Path to an audio file already on disk
    pub fn local_file(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            local: true,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_local(&self) -> bool {
        self.local
    }
}

impl std::fmt::Display for SongRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A retrievable audio source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaHandle {
    /// Direct video URL
    Url(Url),
    /// Search expression understood by yt-dlp (e.g. `ytsearch1:artist title`)
    Search(String),
    /// Existing local audio file
    Local(PathBuf),
}

impl MediaHandle {
    /// Argument passed to the download tool
    pub fn locator(&self) -> String {
        match self {
            MediaHandle::Url(url) => url.to_string(),
            MediaHandle::Search(query) => query.clone(),
            MediaHandle::Local(path) => path.display().to_string(),
        }
    }
}

impl std::fmt::Display for MediaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaHandle::Url(url) => write!(f, "{}", url),
            MediaHandle::Search(query) => write!(f, "search \"{}\"", query),
            MediaHandle::Local(path) => write!(f, "file {}", path.display()),
        }
    }
}

/// Resolve a request without touching the network
pub fn resolve(request: &SongRequest) -> Result<MediaHandle, ResolutionError> {
    let raw = request.as_str().trim();
    if raw.is_empty() {
        return Err(ResolutionError::Empty);
    }

    if request.is_local() {
        let path = PathBuf::from(raw);
        if !path.is_file() {
            return Err(ResolutionError::FileNotFound(raw.to_string()));
        }
        return Ok(MediaHandle::Local(path));
    }

    if looks_like_url(raw) {
        let url = Url::parse(raw).map_err(|e| ResolutionError::InvalidUrl(format!("{}: {}", raw, e)))?;
        return match url.scheme() {
            "http" | "https" => {
                if url.host_str().map_or(true, str::is_empty) {
                    Err(ResolutionError::InvalidUrl(raw.to_string()))
                } else {
                    Ok(MediaHandle::Url(url))
                }
            }
            other => Err(ResolutionError::UnsupportedScheme(other.to_string())),
        };
    }

    // Everything else is a search term; take the first hit
    Ok(MediaHandle::Search(format!("ytsearch1:{}", raw)))
}

fn looks_like_url(raw: &str) -> bool {
    match raw.split_once("://") {
        Some((scheme, _)) => !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_http_urls() {
        let handle = resolve(&SongRequest::remote("https://example.com/watch?id=abc")).unwrap();
        assert_eq!(handle.locator(), "https://example.com/watch?id=abc");
        assert!(matches!(handle, MediaHandle::Url(_)));
    }

    #[test]
    fn test_search_terms_become_first_hit_searches() {
        let handle = resolve(&SongRequest::remote("  Band B Song A ")).unwrap();
        assert_eq!(handle, MediaHandle::Search("ytsearch1:Band B Song A".to_string()));
    }

    #[test]
    fn test_rejects_empty_and_foreign_schemes() {
        assert!(matches!(
            resolve(&SongRequest::remote("   ")),
            Err(ResolutionError::Empty)
        ));
        assert!(matches!(
            resolve(&SongRequest::remote("ftp://example.com/song.mp3")),
            Err(ResolutionError::UnsupportedScheme(s)) if s == "ftp"
        ));
        assert!(matches!(
            resolve(&SongRequest::remote("https://")),
            Err(ResolutionError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_local_files_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("song.mp3");
        std::fs::write(&file, b"audio").unwrap();

        let handle = resolve(&SongRequest::local_file(file.display().to_string())).unwrap();
        assert_eq!(handle, MediaHandle::Local(file));

        let missing = dir.path().join("missing.mp3");
        assert!(matches!(
            resolve(&SongRequest::local_file(missing.display().to_string())),
            Err(ResolutionError::FileNotFound(_))
        ));
    }
}

//! AcoustID web service client
//!
//! Lookups turn a [`Fingerprint`] into [`CandidateMatch`]es ordered by
//! descending score. Submissions send user-corrected metadata back.

use crate::config::{AcoustIdConfig, Credentials};
use crate::error::ServiceError;
use crate::fingerprint::Fingerprint;
use crate::track::{single_album_name, CandidateMatch, ReleaseType, TrackMetadata};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("songtag/", env!("CARGO_PKG_VERSION"));
const LOOKUP_META: &str = "recordings releasegroups releases tracks";

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
pub struct LookupResponse {
    #[serde(default)]
    pub results: Vec<LookupResult>,
}

#[derive(Debug, Deserialize)]
pub struct LookupResult {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub recordings: Vec<Recording>,
}

#[derive(Debug, Deserialize)]
pub struct Recording {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub releasegroups: Vec<ReleaseGroup>,
}

#[derive(Debug, Deserialize)]
pub struct Artist {
    pub name: String,
    #[serde(default)]
    pub joinphrase: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseGroup {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub secondarytypes: Vec<String>,
    #[serde(default)]
    pub releases: Vec<Release>,
}

#[derive(Debug, Deserialize)]
pub struct Release {
    #[serde(default)]
    pub date: Option<ReleaseDate>,
    #[serde(default)]
    pub mediums: Vec<Medium>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseDate {
    #[serde(default)]
    pub year: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct Medium {
    #[serde(default)]
    pub tracks: Vec<MediumTrack>,
}

#[derive(Debug, Deserialize)]
pub struct MediumTrack {
    #[serde(default)]
    pub position: Option<u32>,
}

impl ReleaseGroup {
    /// A release group counts as an album or single only when that is its sole type
    fn pure_type(&self) -> ReleaseType {
        if !self.secondarytypes.is_empty() {
            return ReleaseType::Other;
        }
        self.kind.as_deref().map(ReleaseType::parse).unwrap_or(ReleaseType::Other)
    }

    fn earliest_year(&self) -> Option<i32> {
        self.releases
            .iter()
            .filter_map(|r| r.date.as_ref().and_then(|d| d.year))
            .min()
    }

    fn track_number(&self) -> Option<u32> {
        self.releases
            .iter()
            .flat_map(|r| r.mediums.iter())
            .flat_map(|m| m.tracks.iter())
            .find_map(|t| t.position)
    }
}

/// Join artist credits the way MusicBrainz displays them
pub fn join_artists(artists: &[Artist]) -> String {
    artists
        .iter()
        .map(|a| format!("{}{}", a.name, a.joinphrase.as_deref().unwrap_or("")))
        .collect()
}

/// Flatten a lookup response into candidates, highest score first.
/// Equal scores keep the service's order.
pub fn candidates_from_response(response: &LookupResponse) -> Vec<CandidateMatch> {
    let mut candidates = Vec::new();

    for result in &response.results {
        for recording in &result.recordings {
            let Some(title) = recording.title.as_deref().filter(|t| !t.is_empty()) else {
                continue;
            };
            // An uncredited recording still counts; its artist stays empty
            let artist = join_artists(&recording.artists);

            let group = [ReleaseType::Album, ReleaseType::Single].into_iter().find_map(|wanted| {
                recording
                    .releasegroups
                    .iter()
                    .find(|g| g.pure_type() == wanted && g.title.as_deref().is_some_and(|t| !t.is_empty()))
            });

            let (metadata, release_type) = match group {
                Some(group) => (
                    TrackMetadata {
                        artist,
                        title: title.to_string(),
                        album: group.title.clone().unwrap_or_default(),
                        track_number: group.track_number(),
                        year: group.earliest_year(),
                        release_group_id: group.id.clone(),
                    },
                    group.pure_type(),
                ),
                None => (
                    TrackMetadata::new(artist, title, single_album_name(title)),
                    ReleaseType::Other,
                ),
            };

            candidates.push(CandidateMatch {
                metadata,
                score: result.score,
                release_type,
                recording_id: recording.id.clone(),
            });
        }
    }

    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    candidates
}

fn map_api_error(error: ApiError) -> ServiceError {
    match error.code {
        4 | 6 => ServiceError::InvalidApiKey,
        14 => ServiceError::QuotaExceeded(error.message),
        5 | 13 => ServiceError::Unavailable(error.message),
        code => ServiceError::Rejected {
            code,
            message: error.message,
        },
    }
}

/// Map a non-`ok` status envelope to the matching service error
fn check_envelope(status: u16, body: &str) -> Result<(), ServiceError> {
    match serde_json::from_str::<Envelope>(body) {
        Ok(envelope) if envelope.status == "ok" => Ok(()),
        Ok(envelope) => Err(envelope
            .error
            .map(map_api_error)
            .unwrap_or_else(|| ServiceError::Parse(format!("status {}", envelope.status)))),
        Err(_) if status >= 400 => Err(ServiceError::Http(status, body.chars().take(200).collect())),
        Err(e) => Err(ServiceError::Parse(e.to_string())),
    }
}

/// AcoustID API client
pub struct AcoustIdClient {
    http_client: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    max_retries: u32,
    retry_backoff: Duration,
}

impl AcoustIdClient {
    pub fn new(config: &AcoustIdConfig, credentials: Credentials) -> Result<Self, ServiceError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    /// Look up recordings matching a fingerprint
    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Vec<CandidateMatch>, ServiceError> {
        let form = vec![
            ("format", "json".to_string()),
            ("client", self.credentials.application_key.clone()),
            ("meta", LOOKUP_META.to_string()),
            ("duration", fingerprint.duration_secs().to_string()),
            ("fingerprint", fingerprint.fingerprint.clone()),
        ];

        debug!(duration = fingerprint.duration_secs(), "Querying AcoustID");
        let body = self.post_with_retries("lookup", &form).await?;

        let response: LookupResponse =
            serde_json::from_str(&body).map_err(|e| ServiceError::Parse(e.to_string()))?;
        let candidates = candidates_from_response(&response);

        match candidates.first() {
            Some(top) => info!(
                candidates = candidates.len(),
                score = top.score,
                "AcoustID best match: {}",
                top.metadata
            ),
            None => info!("AcoustID returned no matches"),
        }

        Ok(candidates)
    }

    /// Submit corrected metadata for a fingerprint; needs the user key
    pub async fn submit(&self, fingerprint: &Fingerprint, metadata: &TrackMetadata) -> Result<(), ServiceError> {
        let user_key = self
            .credentials
            .user_key
            .clone()
            .ok_or(ServiceError::MissingUserKey)?;

        let form = vec![
            ("format", "json".to_string()),
            ("client", self.credentials.application_key.clone()),
            ("user", user_key),
            ("duration.0", fingerprint.duration_secs().to_string()),
            ("fingerprint.0", fingerprint.fingerprint.clone()),
            ("artist.0", metadata.artist.clone()),
            ("track.0", metadata.title.clone()),
            ("album.0", metadata.album.clone()),
            ("albumartist.0", metadata.artist.clone()),
            ("fileformat.0", "MP3".to_string()),
        ];

        self.post_with_retries("submit", &form).await?;
        info!("Submitted metadata to AcoustID: {}", metadata);
        Ok(())
    }

    async fn post_with_retries(&self, endpoint: &str, form: &[(&str, String)]) -> Result<String, ServiceError> {
        let mut attempt = 0;
        loop {
            match self.post(endpoint, form).await {
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = retry_delay(self.retry_backoff, attempt);
                    warn!("AcoustID {} failed ({}), retrying in {:?}", endpoint, e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn post(&self, endpoint: &str, form: &[(&str, String)]) -> Result<String, ServiceError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .http_client
            .post(&url)
            .form(form)
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        check_envelope(status, &body)?;
        Ok(body)
    }
}

/// Exponential backoff: base, 2 * base, 4 * base, ...
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(16))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const SAMPLE: &str = r#"{
        "status": "ok",
        "results": [
            {"id": "low", "score": 0.40, "recordings": [
                {"id": "rec-2", "title": "Other Song", "artists": [{"name": "Someone"}]}
            ]},
            {"id": "empty", "score": 0.99},
            {"id": "high", "score": 0.95, "recordings": [
                {"id": "rec-1", "title": "Song A",
                 "artists": [{"name": "Band B", "joinphrase": " feat. "}, {"name": "Guest C"}],
                 "releasegroups": [
                    {"id": "rg-comp", "title": "Hits", "type": "Album", "secondarytypes": ["Compilation"]},
                    {"id": "rg-single", "title": "Song A", "type": "Single"},
                    {"id": "rg-album", "title": "First Album", "type": "Album",
                     "releases": [
                        {"date": {"year": 2012}, "mediums": [{"tracks": [{"position": 3}]}]},
                        {"date": {"year": 2009}}
                     ]}
                 ]},
                {"id": "rec-untitled", "artists": [{"name": "Nobody"}]}
            ]}
        ]
    }"#;

    fn sample_candidates() -> Vec<CandidateMatch> {
        let response: LookupResponse = serde_json::from_str(SAMPLE).unwrap();
        candidates_from_response(&response)
    }

    #[test]
    fn test_candidates_sorted_by_score() {
        let candidates = sample_candidates();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].score, 0.95);
        assert_eq!(candidates[1].score, 0.40);
    }

    #[test]
    fn test_album_release_group_preferred() {
        let best = &sample_candidates()[0];
        assert_eq!(best.metadata.artist, "Band B feat. Guest C");
        assert_eq!(best.metadata.title, "Song A");
        assert_eq!(best.metadata.album, "First Album");
        assert_eq!(best.metadata.year, Some(2009));
        assert_eq!(best.metadata.track_number, Some(3));
        assert_eq!(best.metadata.release_group_id.as_deref(), Some("rg-album"));
        assert_eq!(best.release_type, ReleaseType::Album);
        assert_eq!(best.recording_id.as_deref(), Some("rec-1"));
    }

    #[test]
    fn test_recording_without_release_becomes_single() {
        let other = &sample_candidates()[1];
        assert_eq!(other.metadata.album, "Other Song - Single");
        assert_eq!(other.release_type, ReleaseType::Other);
        assert!(other.metadata.release_group_id.is_none());
    }

    #[test]
    fn test_recording_without_artists_is_kept() {
        let json = r#"{"status": "ok", "results": [
            {"score": 0.7, "recordings": [{"id": "rec-anon", "title": "Nameless Song"}]}
        ]}"#;
        let response: LookupResponse = serde_json::from_str(json).unwrap();
        let candidates = candidates_from_response(&response);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].metadata.artist, "");
        assert_eq!(candidates[0].metadata.title, "Nameless Song");
        assert_eq!(candidates[0].recording_id.as_deref(), Some("rec-anon"));
    }

    #[test]
    fn test_equal_scores_keep_service_order() {
        let json = r#"{"status": "ok", "results": [
            {"score": 0.8, "recordings": [{"title": "First", "artists": [{"name": "A"}]}]},
            {"score": 0.8, "recordings": [{"title": "Second", "artists": [{"name": "A"}]}]}
        ]}"#;
        let response: LookupResponse = serde_json::from_str(json).unwrap();
        let candidates = candidates_from_response(&response);
        assert_eq!(candidates[0].metadata.title, "First");
        assert_eq!(candidates[1].metadata.title, "Second");
    }

    #[test]
    fn test_error_envelope_mapping() {
        let invalid_key = r#"{"status": "error", "error": {"code": 4, "message": "invalid API key"}}"#;
        assert!(matches!(check_envelope(400, invalid_key), Err(ServiceError::InvalidApiKey)));

        let quota = r#"{"status": "error", "error": {"code": 14, "message": "too many requests"}}"#;
        assert!(matches!(check_envelope(429, quota), Err(ServiceError::QuotaExceeded(_))));

        let bad_fp = r#"{"status": "error", "error": {"code": 3, "message": "invalid fingerprint"}}"#;
        assert!(matches!(
            check_envelope(400, bad_fp),
            Err(ServiceError::Rejected { code: 3, .. })
        ));

        assert!(matches!(
            check_envelope(502, "<html>Bad Gateway</html>"),
            Err(ServiceError::Http(502, _))
        ));
        assert!(check_envelope(200, r#"{"status": "ok", "results": []}"#).is_ok());
    }

    #[test]
    fn test_retry_delay_doubles() {
        let base = Duration::from_millis(500);
        assert_eq!(retry_delay(base, 0), Duration::from_millis(500));
        assert_eq!(retry_delay(base, 1), Duration::from_millis(1000));
        assert_eq!(retry_delay(base, 2), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_submit_requires_user_key() {
        let credentials = Credentials {
            application_key: "app".to_string(),
            user_key: None,
        };
        let client = AcoustIdClient::new(&crate::Config::default().acoustid, credentials).unwrap();
        let fp = Fingerprint {
            duration: 200.0,
            fingerprint: "AQAA".to_string(),
        };
        let result = client.submit(&fp, &TrackMetadata::new("A", "B", "C")).await;
        assert!(matches!(result, Err(ServiceError::MissingUserKey)));
    }

    /// Serves one canned `(status, body)` response per connection and counts requests
    async fn stub_server(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                read_request(&mut socket).await;
                counter.fetch_add(1, Ordering::SeqCst);

                let reply = format!(
                    "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}", addr), hits)
    }

    /// Reads headers and a `Content-Length` body
    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let Ok(n) = socket.read(&mut buf).await else {
                return;
            };
            if n == 0 {
                return;
            }
            data.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&data);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if data.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    fn stub_client(base_url: String, max_retries: u32) -> AcoustIdClient {
        let config = AcoustIdConfig {
            base_url,
            timeout_secs: 5,
            max_retries,
            retry_backoff_ms: 1,
        };
        let credentials = Credentials {
            application_key: "app".to_string(),
            user_key: None,
        };
        AcoustIdClient::new(&config, credentials).unwrap()
    }

    fn fingerprint() -> Fingerprint {
        Fingerprint {
            duration: 215.0,
            fingerprint: "AQAA".to_string(),
        }
    }

    #[tokio::test]
    async fn test_lookup_retries_transient_failure() {
        let ok = r#"{"status": "ok", "results": [
            {"score": 0.9, "recordings": [{"title": "Song A", "artists": [{"name": "Band B"}]}]}
        ]}"#;
        let (base_url, hits) = stub_server(vec![(503, "Service Unavailable"), (200, ok)]).await;
        let client = stub_client(base_url, 2);

        let candidates = client.lookup(&fingerprint()).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].metadata.artist, "Band B");
    }

    #[tokio::test]
    async fn test_lookup_does_not_retry_rejected_key() {
        let invalid_key = r#"{"status": "error", "error": {"code": 4, "message": "invalid API key"}}"#;
        let (base_url, hits) = stub_server(vec![(400, invalid_key), (200, r#"{"status": "ok"}"#)]).await;
        let client = stub_client(base_url, 2);

        let result = client.lookup(&fingerprint()).await;
        assert!(matches!(result, Err(ServiceError::InvalidApiKey)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lookup_gives_up_after_retries() {
        let (base_url, hits) = stub_server(vec![(503, "busy"), (503, "busy")]).await;
        let client = stub_client(base_url, 1);

        let result = client.lookup(&fingerprint()).await;
        assert!(matches!(result, Err(ServiceError::Http(503, _))));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}

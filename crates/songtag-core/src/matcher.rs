//! Fingerprint matching against the identification service

use crate::acoustid::AcoustIdClient;
use crate::error::{FingerprintError, ServiceError};
use crate::fingerprint::{Fingerprint, Fpcalc};
use crate::track::{CandidateMatch, TrackMetadata};
use async_trait::async_trait;
use std::path::Path;

/// Acoustic identification of audio files
#[async_trait]
pub trait Identifier: Send + Sync {
    async fn fingerprint(&self, audio: &Path) -> Result<Fingerprint, FingerprintError>;

    /// Candidates ordered by descending score; empty means "no match"
    async fn identify(&self, fingerprint: &Fingerprint) -> Result<Vec<CandidateMatch>, ServiceError>;

    /// Contribute corrected metadata back to the service
    async fn submit(&self, fingerprint: &Fingerprint, metadata: &TrackMetadata) -> Result<(), ServiceError>;
}

/// Chromaprint via `fpcalc` plus the AcoustID web service
pub struct FingerprintMatcher {
    fpcalc: Fpcalc,
    client: AcoustIdClient,
}

impl FingerprintMatcher {
    pub fn new(fpcalc: Fpcalc, client: AcoustIdClient) -> Self {
        Self { fpcalc, client }
    }
}

#[async_trait]
impl Identifier for FingerprintMatcher {
    async fn fingerprint(&self, audio: &Path) -> Result<Fingerprint, FingerprintError> {
        self.fpcalc.fingerprint(audio).await
    }

    async fn identify(&self, fingerprint: &Fingerprint) -> Result<Vec<CandidateMatch>, ServiceError> {
        self.client.lookup(fingerprint).await
    }

    async fn submit(&self, fingerprint: &Fingerprint, metadata: &TrackMetadata) -> Result<(), ServiceError> {
        self.client.submit(fingerprint, metadata).await
    }
}

// src/fallback.rs
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::hashing::Fingerprint;
use crate::matcher::{MatchOptions, Matcher, Ranking};
use crate::store::FingerprintStore;

/// Third-party recognition, consulted only when local matching is inconclusive.
pub trait RecognitionService: Send + Sync {
    /// Submits an audio sample file and returns the raw response body.
    /// Unreachable services report `Error::ServiceUnavailable`.
    fn identify(&self, sample: &Path) -> Result<String>;
}

#[derive(Debug, Default, Deserialize)]
pub struct RecognitionResponse {
    #[serde(default)]
    metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    music: Vec<MusicEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct MusicEntry {
    #[serde(default)]
    external_metadata: Option<ExternalMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct ExternalMetadata {
    #[serde(default)]
    spotify: Option<SpotifyMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct SpotifyMetadata {
    #[serde(default)]
    track: Option<TrackRef>,
}

#[derive(Debug, Default, Deserialize)]
struct TrackRef {
    #[serde(default)]
    id: Option<String>,
}

impl RecognitionResponse {
    pub fn parse(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    /// `metadata.music[0].external_metadata.spotify.track.id`, if every level is present.
    pub fn external_track_id(&self) -> Option<&str> {
        self.metadata
            .as_ref()?
            .music
            .first()?
            .external_metadata
            .as_ref()?
            .spotify
            .as_ref()?
            .track
            .as_ref()?
            .id
            .as_deref()
            .filter(|id| !id.is_empty())
    }
}

pub fn spotify_track_url(track_id: &str) -> String {
    format!("https://open.spotify.com/track/{}", track_id)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Ranked catalog matches; possibly partial when the deadline was hit.
    Local(Ranking),
    /// Track id reported by the external service.
    External(String),
    NoMatch,
}

/// Local matching first, external recognition second.
pub struct Resolver<S: FingerprintStore + ?Sized> {
    matcher: Matcher<S>,
    service: Option<Arc<dyn RecognitionService>>,
}

impl<S: FingerprintStore + ?Sized> Resolver<S> {
    pub fn new(matcher: Matcher<S>) -> Self {
        Self {
            matcher,
            service: None,
        }
    }

    pub fn with_service(mut self, service: Arc<dyn RecognitionService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn matcher(&self) -> &Matcher<S> {
        &self.matcher
    }

    /// Store faults propagate. Service faults never do: they are logged and the
    /// request degrades to whatever the local ranking holds.
    pub fn resolve(
        &self,
        query: &Fingerprint,
        sample: Option<&Path>,
        options: &MatchOptions,
    ) -> Result<Resolution> {
        let ranking = self.matcher.find_matches_with(query, options)?;
        if !ranking.is_empty() && !ranking.timed_out() {
            return Ok(Resolution::Local(ranking));
        }

        if let (Some(service), Some(sample)) = (&self.service, sample) {
            if let Some(track_id) = self.ask_service(service.as_ref(), sample) {
                info!(track_id = %track_id, "resolved by external recognition");
                return Ok(Resolution::External(track_id));
            }
        }

        if ranking.is_empty() {
            Ok(Resolution::NoMatch)
        } else {
            Ok(Resolution::Local(ranking))
        }
    }

    fn ask_service(&self, service: &dyn RecognitionService, sample: &Path) -> Option<String> {
        let body = match service.identify(sample) {
            Ok(body) => body,
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "recognition service unavailable; degrading to no match");
                return None;
            }
            Err(e) => {
                error!(error = %e, "recognition request failed");
                return None;
            }
        };
        match RecognitionResponse::parse(&body) {
            Ok(response) => response.external_track_id().map(str::to_string),
            Err(e) => {
                warn!(error = %e, "unreadable recognition response");
                None
            }
        }
    }
}

// src/protocol.rs
//! Message shapes exchanged with a real-time transport. The transport itself lives elsewhere.

use base64::prelude::{BASE64_STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::audio::PcmBuffer;
use crate::error::{Error, ErrorKind, Result};
use crate::hashing::Fingerprint;
use crate::matcher::{Ranking, RankingStatus};
use crate::models::{MatchResult, SongId};

/// Matches sent per response, whatever the matcher was allowed to return.
pub const MAX_RESPONSE_MATCHES: usize = 10;

const INTERNAL_ERROR_MESSAGE: &str = "Something went wrong. Please try again later.";

/// `{"fingerprint": {"<hash>": <offset>, ...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub fingerprint: Fingerprint,
}

impl QueryRequest {
    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| Error::MalformedPayload(e.to_string()))
    }
}

/// Raw recording from a client: little-endian integer PCM, base64-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingRequest {
    pub audio: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// Bits per sample.
    pub sample_size: u16,
}

impl RecordingRequest {
    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| Error::MalformedPayload(e.to_string()))
    }

    pub fn new(pcm_bytes: &[u8], sample_rate: u32, channels: u16, sample_size: u16) -> Self {
        Self {
            audio: BASE64_STANDARD.encode(pcm_bytes),
            sample_rate,
            channels,
            sample_size,
        }
    }

    pub fn audio_bytes(&self) -> Result<Vec<u8>> {
        BASE64_STANDARD
            .decode(&self.audio)
            .map_err(|e| Error::MalformedPayload(format!("audio is not valid base64: {}", e)))
    }

    pub fn to_pcm(&self) -> Result<PcmBuffer> {
        let bytes = self.audio_bytes()?;
        PcmBuffer::from_le_bytes(&bytes, self.sample_size, self.sample_rate, self.channels)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPayload {
    pub song_id: SongId,
    pub title: String,
    pub artist: String,
    pub external_ref: Option<String>,
    pub score: usize,
    pub offset_frames: i64,
}

impl From<&MatchResult> for MatchPayload {
    fn from(result: &MatchResult) -> Self {
        Self {
            song_id: result.song.id,
            title: result.song.title.clone(),
            artist: result.song.artist.clone(),
            external_ref: result.song.external_ref.clone(),
            score: result.score,
            offset_frames: result.offset_frames,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub matches: Vec<MatchPayload>,
    /// False when the deadline cut the ranking short.
    pub complete: bool,
}

impl From<&Ranking> for QueryResponse {
    fn from(ranking: &Ranking) -> Self {
        Self {
            matches: ranking
                .matches
                .iter()
                .take(MAX_RESPONSE_MATCHES)
                .map(MatchPayload::from)
                .collect(),
            complete: ranking.status == RankingStatus::Complete,
        }
    }
}

impl QueryResponse {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusType {
    Info,
    Success,
    Error,
}

/// `{"type": "info" | "success" | "error", "message": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    #[serde(rename = "type")]
    pub status: StatusType,
    pub message: String,
}

impl StatusMessage {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            status: StatusType::Info,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: StatusType::Success,
            message: message.into(),
        }
    }

    /// User-facing errors keep their text. Internal ones are logged and replaced by a
    /// generic line.
    pub fn from_error(err: &Error) -> Self {
        let message = match err.kind() {
            ErrorKind::UserFacing => err.to_string(),
            ErrorKind::Internal => {
                error!(error = %err, retryable = err.is_retryable(), "internal error");
                INTERNAL_ERROR_MESSAGE.to_string()
            }
        };
        Self {
            status: StatusType::Error,
            message,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Song;

    fn result(id: SongId, score: usize) -> MatchResult {
        MatchResult {
            song: Song {
                id,
                title: format!("t{}", id),
                artist: "a".into(),
                lookup_key: format!("t{}---a", id),
                external_ref: None,
            },
            score,
            matched_hashes: score,
            offset_frames: 0,
        }
    }

    #[test]
    fn parses_fingerprint_request() {
        let request = QueryRequest::from_json(r#"{"fingerprint": {"123": 4, "99": 0}}"#).unwrap();
        assert_eq!(request.fingerprint.get(123), Some(4));
        assert_eq!(request.fingerprint.get(99), Some(0));
    }

    #[test]
    fn malformed_request_is_user_facing() {
        for payload in [
            "not json",
            r#"{"fingerprint": {"abc": 1}}"#,
            r#"{"fingerprint": {"1": -4}}"#,
            r#"{"fingerprint": [1, 2]}"#,
            r#"{}"#,
        ] {
            let err = QueryRequest::from_json(payload).unwrap_err();
            assert!(matches!(err, Error::MalformedPayload(_)), "{}", payload);
            assert_eq!(err.kind(), ErrorKind::UserFacing);
        }
    }

    #[test]
    fn response_is_capped() {
        let ranking = Ranking {
            matches: (1..=15).map(|id| result(id, 100 - id as usize)).collect(),
            status: RankingStatus::Complete,
        };
        let response = QueryResponse::from(&ranking);
        assert_eq!(response.matches.len(), MAX_RESPONSE_MATCHES);
        assert_eq!(response.matches[0].song_id, 1);
        assert!(response.complete);

        let json = response.to_json().unwrap();
        assert!(json.contains(r#""songId":1"#));
        assert!(json.contains(r#""externalRef":null"#));
    }

    #[test]
    fn timed_out_ranking_is_incomplete() {
        let ranking = Ranking {
            matches: vec![],
            status: RankingStatus::TimedOut,
        };
        assert!(!QueryResponse::from(&ranking).complete);
    }

    #[test]
    fn recording_decodes_to_pcm() {
        // [0x00, 0x00, 0xff, 0x7f]
        let request = RecordingRequest::from_json(
            r#"{"audio": "AAD/fw==", "sampleRate": 44100, "channels": 1, "sampleSize": 16}"#,
        )
        .unwrap();
        let pcm = request.to_pcm().unwrap();
        assert_eq!(pcm.sample_rate(), 44100);
        assert_eq!(pcm.samples(), &[0.0, 1.0]);
    }

    #[test]
    fn recording_round_trips_through_json() {
        let bytes = [0x01, 0x80, 0xff, 0x7f, 0x00, 0x00];
        let request = RecordingRequest::new(&bytes, 8000, 1, 16);
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""audio":"AYD/fwAA""#), "{}", json);

        let parsed = RecordingRequest::from_json(&json).unwrap();
        assert_eq!(parsed.audio_bytes().unwrap(), bytes);
        assert_eq!(parsed.to_pcm().unwrap().samples(), &[-1.0, 1.0, 0.0]);
    }

    #[test]
    fn recording_with_bad_base64_is_malformed() {
        let request = RecordingRequest::from_json(
            r#"{"audio": "not base64!", "sampleRate": 8000, "channels": 1, "sampleSize": 16}"#,
        )
        .unwrap();
        let err = request.to_pcm().unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)));
        assert_eq!(err.kind(), ErrorKind::UserFacing);

        // byte arrays are not accepted in place of the encoded string
        let err = RecordingRequest::from_json(
            r#"{"audio": [0, 0], "sampleRate": 8000, "channels": 1, "sampleSize": 16}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)));
    }

    #[test]
    fn recording_with_odd_sample_size_is_rejected() {
        let request = RecordingRequest::new(&[0; 6], 8000, 1, 12);
        assert!(matches!(request.to_pcm(), Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn status_messages_follow_error_kind() {
        let duplicate = Error::Duplicate {
            title: "Song".into(),
            artist: "Band".into(),
            song_id: 2,
        };
        let status = StatusMessage::from_error(&duplicate);
        assert_eq!(status.status, StatusType::Error);
        assert_eq!(status.message, duplicate.to_string());

        let internal = StatusMessage::from_error(&Error::Resample("ratio out of range".into()));
        assert_eq!(internal.message, INTERNAL_ERROR_MESSAGE);

        let json = StatusMessage::success("done").to_json().unwrap();
        assert_eq!(json, r#"{"type":"success","message":"done"}"#);
        assert_eq!(StatusMessage::info("x").status, StatusType::Info);
    }
}

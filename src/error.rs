// src/error.rs

use serde::Serialize;
use thiserror::Error;

use crate::models::SongId;

/// Who an error message is meant for.
///
/// `UserFacing` messages may be shown to the client verbatim (bad input, duplicates).
/// `Internal` messages are logged and replaced by a generic line before they leave the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserFacing,
    Internal,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed fingerprint payload: {0}")]
    MalformedPayload(String),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("'{title}' by '{artist}' already exists in the catalog (song id {song_id})")]
    Duplicate {
        title: String,
        artist: String,
        song_id: SongId,
    },

    #[error("audio produced no usable fingerprint")]
    UnusableAudio,

    #[error("song {0} not found")]
    SongNotFound(SongId),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("audio decoding failed: {0}")]
    Decode(String),

    #[error("resampling failed: {0}")]
    Resample(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("recognition service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedPayload(_)
            | Error::UnsupportedFormat(_)
            | Error::Duplicate { .. }
            | Error::UnusableAudio
            | Error::SongNotFound(_) => ErrorKind::UserFacing,
            Error::Database(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Decode(_)
            | Error::Resample(_)
            | Error::Config(_)
            | Error::ServiceUnavailable(_) => ErrorKind::Internal,
        }
    }

    /// Storage and service faults; input errors need a corrected resubmission instead.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Database(_) | Error::Io(_) | Error::ServiceUnavailable(_)
        )
    }
}

// Errors travel to clients as their display string.
impl Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

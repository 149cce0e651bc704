// src/models.rs
use serde::{Deserialize, Serialize};

pub type SongId = u32;

/// A catalog entry. Everything except `external_ref` is fixed at ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub id: SongId,
    pub title: String,
    pub artist: String,
    pub lookup_key: String,
    pub external_ref: Option<String>,
}

/// Metadata for a song that has not been stored yet; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSong {
    pub title: String,
    pub artist: String,
    pub external_ref: Option<String>,
}

impl NewSong {
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            external_ref: None,
        }
    }

    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }

    pub fn lookup_key(&self) -> String {
        song_key(&self.title, &self.artist)
    }

    pub(crate) fn into_song(self, id: SongId) -> Song {
        let lookup_key = self.lookup_key();
        Song {
            id,
            title: self.title,
            artist: self.artist,
            lookup_key,
            external_ref: self.external_ref,
        }
    }
}

/// One stored `hash -> (song, offset)` association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexRecord {
    pub song_id: SongId,
    pub offset: u32,
}

/// A ranked candidate for one query. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub song: Song,
    /// Hashes agreeing on the best alignment delta.
    pub score: usize,
    /// All hashes shared with the query, aligned or not.
    pub matched_hashes: usize,
    /// `stored offset - query offset` of the winning histogram bin, in frames.
    pub offset_frames: i64,
}

impl MatchResult {
    pub fn song_id(&self) -> SongId {
        self.song.id
    }
}

fn normalize(text: &str) -> String {
    let words = text
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    // dash runs collapse to one dash and edge dashes go
    let mut out = String::with_capacity(words.len());
    for c in words.chars() {
        if !(c == '-' && out.ends_with('-')) {
            out.push(c);
        }
    }
    out.trim_matches(|c: char| c == '-' || c.is_whitespace())
        .to_string()
}

/// Dedup key for a song: normalized title and artist joined by `---`. Normalized parts never
/// hold `--` or touch a dash at either end, so the separator splits a key in exactly one way.
pub fn song_key(title: &str, artist: &str) -> String {
    format!("{}---{}", normalize(title), normalize(artist))
}

// src/store/mod.rs
//! Inverted index `hash -> (song, offset)` plus the song catalog.

use std::collections::HashMap;

use crate::error::Result;
use crate::hashing::Fingerprint;
use crate::models::{IndexRecord, NewSong, Song, SongId};

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Storage contract shared by the matcher and the registrar.
///
/// Implementations own their locking. A `put` is atomic: a concurrent `lookup` sees all of
/// a song's records or none of them, and the same holds for `delete_song`.
pub trait FingerprintStore: Send + Sync {
    /// Creates the song and one index record per fingerprint entry in a single unit.
    /// Returns `Error::Duplicate` when the lookup key is already taken.
    fn put(&self, song: &NewSong, fingerprint: &Fingerprint) -> Result<Song>;

    /// Records for every requested hash present in the index; absent hashes are omitted.
    fn lookup(&self, hashes: &[u32]) -> Result<HashMap<u32, Vec<IndexRecord>>>;

    fn total_songs(&self) -> Result<usize>;

    fn song_by_key(&self, lookup_key: &str) -> Result<Option<Song>>;

    fn song_by_id(&self, song_id: SongId) -> Result<Option<Song>>;

    /// Songs in ascending id order.
    fn songs(&self) -> Result<Vec<Song>>;

    fn all_external_refs(&self) -> Result<Vec<String>>;

    /// Returns false when the song does not exist.
    fn set_external_ref(&self, song_id: SongId, external_ref: &str) -> Result<bool>;

    /// Removes the song and all of its index records. Returns false when it did not exist.
    fn delete_song(&self, song_id: SongId) -> Result<bool>;
}

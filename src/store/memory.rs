// src/store/memory.rs
use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;
use rayon::prelude::*;
use tracing::{debug, info};

use super::FingerprintStore;
use crate::config::MatchConfig;
use crate::error::{Error, Result};
use crate::hashing::Fingerprint;
use crate::models::{IndexRecord, NewSong, Song, SongId};

#[derive(Default)]
struct Catalog {
    songs: BTreeMap<SongId, Song>,
    by_key: HashMap<String, SongId>,
    index: HashMap<u32, Vec<IndexRecord>>,
    // hashes each song contributed, so a delete touches only its own postings
    song_hashes: HashMap<SongId, Vec<u32>>,
    next_id: SongId,
}

/// Index held entirely in process memory. Writers take the lock exclusively, so readers
/// never see a song half-inserted or half-removed.
pub struct MemoryStore {
    catalog: RwLock<Catalog>,
    shard_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_shard_size(MatchConfig::default().lookup_shard_size)
    }

    /// `shard_size` hashes are resolved per rayon task in `lookup`.
    pub fn with_shard_size(shard_size: usize) -> Self {
        Self {
            catalog: RwLock::new(Catalog {
                next_id: 1,
                ..Catalog::default()
            }),
            shard_size: shard_size.max(1),
        }
    }

    /// Number of stored index records across all songs.
    pub fn record_count(&self) -> usize {
        self.catalog.read().index.values().map(Vec::len).sum()
    }
}

impl FingerprintStore for MemoryStore {
    fn put(&self, song: &NewSong, fingerprint: &Fingerprint) -> Result<Song> {
        let key = song.lookup_key();
        let mut catalog = self.catalog.write();

        if let Some(&existing) = catalog.by_key.get(&key) {
            return Err(Error::Duplicate {
                title: song.title.clone(),
                artist: song.artist.clone(),
                song_id: existing,
            });
        }

        let song_id = catalog.next_id;
        catalog.next_id += 1;
        let stored = song.clone().into_song(song_id);

        for (hash, offset) in fingerprint.iter() {
            catalog
                .index
                .entry(hash)
                .or_default()
                .push(IndexRecord { song_id, offset });
        }
        catalog.song_hashes.insert(song_id, fingerprint.hashes().collect());
        catalog.by_key.insert(key, song_id);
        catalog.songs.insert(song_id, stored.clone());

        info!(song_id, hashes = fingerprint.len(), "stored song in memory index");
        Ok(stored)
    }

    fn lookup(&self, hashes: &[u32]) -> Result<HashMap<u32, Vec<IndexRecord>>> {
        let unique: Vec<u32> = hashes
            .iter()
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let catalog = self.catalog.read();
        let index = &catalog.index;
        let found: HashMap<u32, Vec<IndexRecord>> = unique
            .par_chunks(self.shard_size)
            .flat_map_iter(|shard| {
                shard
                    .iter()
                    .filter_map(move |hash| index.get(hash).map(|records| (*hash, records.clone())))
            })
            .collect();

        debug!(requested = unique.len(), found = found.len(), "memory lookup");
        Ok(found)
    }

    fn total_songs(&self) -> Result<usize> {
        Ok(self.catalog.read().songs.len())
    }

    fn song_by_key(&self, lookup_key: &str) -> Result<Option<Song>> {
        let catalog = self.catalog.read();
        Ok(catalog
            .by_key
            .get(lookup_key)
            .and_then(|id| catalog.songs.get(id))
            .cloned())
    }

    fn song_by_id(&self, song_id: SongId) -> Result<Option<Song>> {
        Ok(self.catalog.read().songs.get(&song_id).cloned())
    }

    fn songs(&self) -> Result<Vec<Song>> {
        Ok(self.catalog.read().songs.values().cloned().collect())
    }

    fn all_external_refs(&self) -> Result<Vec<String>> {
        Ok(self
            .catalog
            .read()
            .songs
            .values()
            .filter_map(|song| song.external_ref.clone())
            .collect())
    }

    fn set_external_ref(&self, song_id: SongId, external_ref: &str) -> Result<bool> {
        let mut catalog = self.catalog.write();
        match catalog.songs.get_mut(&song_id) {
            Some(song) => {
                song.external_ref = Some(external_ref.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_song(&self, song_id: SongId) -> Result<bool> {
        let mut catalog = self.catalog.write();
        let Some(song) = catalog.songs.remove(&song_id) else {
            return Ok(false);
        };
        catalog.by_key.remove(&song.lookup_key);

        let hashes = catalog.song_hashes.remove(&song_id).unwrap_or_default();
        for hash in hashes {
            if let Some(records) = catalog.index.get_mut(&hash) {
                records.retain(|record| record.song_id != song_id);
                if records.is_empty() {
                    catalog.index.remove(&hash);
                }
            }
        }

        info!(song_id, "deleted song from memory index");
        Ok(true)
    }
}

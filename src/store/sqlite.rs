// src/store/sqlite.rs
use std::collections::{HashMap, HashSet};
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params, params_from_iter};
use tracing::{debug, info};

use super::FingerprintStore;
use crate::config::MatchConfig;
use crate::error::{Error, Result};
use crate::hashing::Fingerprint;
use crate::models::{IndexRecord, NewSong, Song, SongId};

// SQLite's historical bound-parameter limit
const MAX_LOOKUP_CHUNK: usize = 999;

const SCHEMA: &str = "
    BEGIN;
    CREATE TABLE IF NOT EXISTS songs (
        song_id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        artist TEXT NOT NULL,
        song_key TEXT NOT NULL UNIQUE,
        external_ref TEXT,
        enrolled_at DATETIME DEFAULT CURRENT_TIMESTAMP
    );
    CREATE TABLE IF NOT EXISTS fingerprints (
        hash INTEGER NOT NULL,
        song_id INTEGER NOT NULL,
        anchor_time_idx INTEGER NOT NULL,
        FOREIGN KEY (song_id) REFERENCES songs(song_id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_fingerprints_hash ON fingerprints (hash);
    CREATE INDEX IF NOT EXISTS idx_fingerprints_song_id ON fingerprints (song_id);
    COMMIT;";

const SONG_COLUMNS: &str = "song_id, title, artist, song_key, external_ref";

fn song_from_row(row: &Row<'_>) -> rusqlite::Result<Song> {
    Ok(Song {
        id: row.get(0)?,
        title: row.get(1)?,
        artist: row.get(2)?,
        lookup_key: row.get(3)?,
        external_ref: row.get(4)?,
    })
}

/// SQLite-backed store. One connection, serialized through a mutex; every multi-statement
/// operation runs in a transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    lookup_chunk: usize,
}

impl SqliteStore {
    /// Opens (creating if needed) the database file and ensures the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
        let store = Self::init(conn)?;
        info!(path = %path.display(), "opened fingerprint database");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            lookup_chunk: MatchConfig::default().lookup_shard_size,
        })
    }

    /// Hashes bound per `IN (...)` statement in `lookup`, clamped to `1..=999`.
    pub fn with_lookup_chunk(mut self, lookup_chunk: usize) -> Self {
        self.lookup_chunk = lookup_chunk.clamp(1, MAX_LOOKUP_CHUNK);
        self
    }

    pub fn lookup_chunk(&self) -> usize {
        self.lookup_chunk
    }

    /// Number of stored index records across all songs.
    pub fn record_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM fingerprints", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl FingerprintStore for SqliteStore {
    fn put(&self, song: &NewSong, fingerprint: &Fingerprint) -> Result<Song> {
        let key = song.lookup_key();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let existing: Option<SongId> = tx
            .query_row(
                "SELECT song_id FROM songs WHERE song_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(song_id) = existing {
            return Err(Error::Duplicate {
                title: song.title.clone(),
                artist: song.artist.clone(),
                song_id,
            });
        }

        tx.execute(
            "INSERT INTO songs (title, artist, song_key, external_ref) VALUES (?1, ?2, ?3, ?4)",
            params![song.title, song.artist, key, song.external_ref],
        )?;
        let rowid = tx.last_insert_rowid();
        let song_id = SongId::try_from(rowid)
            .map_err(|_| Error::Database(rusqlite::Error::IntegralValueOutOfRange(0, rowid)))?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO fingerprints (hash, song_id, anchor_time_idx) VALUES (?1, ?2, ?3)",
            )?;
            for (hash, offset) in fingerprint.iter() {
                stmt.execute(params![hash, song_id, offset])?;
            }
        }
        tx.commit()?;

        info!(song_id, hashes = fingerprint.len(), title = %song.title, "stored song");
        Ok(song.clone().into_song(song_id))
    }

    fn lookup(&self, hashes: &[u32]) -> Result<HashMap<u32, Vec<IndexRecord>>> {
        let unique: Vec<u32> = hashes
            .iter()
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let mut found: HashMap<u32, Vec<IndexRecord>> = HashMap::new();
        if unique.is_empty() {
            return Ok(found);
        }

        let mut conn = self.conn.lock();
        // one read transaction so every chunk sees the same snapshot
        let tx = conn.transaction()?;
        for chunk in unique.chunks(self.lookup_chunk) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT hash, song_id, anchor_time_idx FROM fingerprints WHERE hash IN ({})",
                placeholders
            );
            let mut stmt = tx.prepare_cached(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    IndexRecord {
                        song_id: row.get(1)?,
                        offset: row.get(2)?,
                    },
                ))
            })?;
            for row in rows {
                let (hash, record) = row?;
                found.entry(hash).or_default().push(record);
            }
        }
        tx.commit()?;

        debug!(requested = unique.len(), found = found.len(), "sqlite lookup");
        Ok(found)
    }

    fn total_songs(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM songs", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn song_by_key(&self, lookup_key: &str) -> Result<Option<Song>> {
        let conn = self.conn.lock();
        let song = conn
            .query_row(
                &format!("SELECT {} FROM songs WHERE song_key = ?1", SONG_COLUMNS),
                params![lookup_key],
                song_from_row,
            )
            .optional()?;
        Ok(song)
    }

    fn song_by_id(&self, song_id: SongId) -> Result<Option<Song>> {
        let conn = self.conn.lock();
        let song = conn
            .query_row(
                &format!("SELECT {} FROM songs WHERE song_id = ?1", SONG_COLUMNS),
                params![song_id],
                song_from_row,
            )
            .optional()?;
        Ok(song)
    }

    fn songs(&self) -> Result<Vec<Song>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare(&format!("SELECT {} FROM songs ORDER BY song_id", SONG_COLUMNS))?;
        let songs = stmt
            .query_map([], song_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(songs)
    }

    fn all_external_refs(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT external_ref FROM songs WHERE external_ref IS NOT NULL ORDER BY song_id",
        )?;
        let refs = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(refs)
    }

    fn set_external_ref(&self, song_id: SongId, external_ref: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE songs SET external_ref = ?1 WHERE song_id = ?2",
            params![external_ref, song_id],
        )?;
        Ok(changed > 0)
    }

    fn delete_song(&self, song_id: SongId) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        // index records first, then the song row
        let records = tx.execute(
            "DELETE FROM fingerprints WHERE song_id = ?1",
            params![song_id],
        )?;
        let songs = tx.execute("DELETE FROM songs WHERE song_id = ?1", params![song_id])?;
        tx.commit()?;

        if songs > 0 {
            info!(song_id, records, "deleted song");
        }
        Ok(songs > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn put_then_lookup() {
        contract::put_then_lookup(&store());
    }

    #[test]
    fn duplicate_key_is_rejected() {
        contract::duplicate_key_is_rejected(&store());
    }

    #[test]
    fn metadata_queries() {
        contract::metadata_queries(&store());
    }

    #[test]
    fn external_ref_backfill() {
        contract::external_ref_backfill(&store());
    }

    #[test]
    fn delete_cascades() {
        contract::delete_cascades(&store());
    }

    #[test]
    fn ids_are_not_reused() {
        contract::ids_are_not_reused(&store());
    }

    #[test]
    fn batched_lookup_equals_union() {
        contract::batched_lookup_equals_union(&store());
    }

    #[test]
    fn small_chunks_give_the_same_lookup() {
        contract::batched_lookup_equals_union(&store().with_lookup_chunk(7));
    }

    #[test]
    fn lookup_chunk_is_clamped() {
        assert_eq!(store().lookup_chunk(), 500);
        assert_eq!(store().with_lookup_chunk(0).lookup_chunk(), 1);
        assert_eq!(store().with_lookup_chunk(5000).lookup_chunk(), 999);
    }

    #[test]
    fn empty_lookup() {
        contract::empty_lookup(&store());
    }

    #[test]
    fn full_u32_hashes_survive_storage() {
        let store = store();
        let fp: Fingerprint = vec![(u32::MAX, 3), (1 << 31, 4)].into_iter().collect();
        store.put(&NewSong::new("Wide", "Hashes"), &fp).unwrap();
        let found = store.lookup(&[u32::MAX, 1 << 31]).unwrap();
        assert_eq!(found[&u32::MAX][0].offset, 3);
        assert_eq!(found[&(1 << 31)][0].offset, 4);
    }

    #[test]
    fn reopened_file_keeps_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.sqlite");
        let fp: Fingerprint = (0..20).map(|h| (h, h * 2)).collect();

        let id = {
            let store = SqliteStore::open(&path).unwrap();
            store.put(&NewSong::new("Kept", "Around"), &fp).unwrap().id
        };

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.total_songs().unwrap(), 1);
        assert_eq!(store.record_count().unwrap(), 20);
        assert_eq!(store.song_by_id(id).unwrap().unwrap().title, "Kept");
    }

    #[test]
    fn delete_removes_every_record() {
        let store = store();
        let fp: Fingerprint = (0..30).map(|h| (h, h)).collect();
        let song = store.put(&NewSong::new("Gone", "Soon"), &fp).unwrap();
        assert_eq!(store.record_count().unwrap(), 30);
        assert!(store.delete_song(song.id).unwrap());
        assert_eq!(store.record_count().unwrap(), 0);
    }
}

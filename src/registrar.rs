// src/registrar.rs
use std::sync::Arc;

use tracing::{info, warn};

use crate::audio::PcmBuffer;
use crate::error::{Error, Result};
use crate::fingerprinter::Fingerprinter;
use crate::hashing::Fingerprint;
use crate::models::{NewSong, Song, SongId};
use crate::store::FingerprintStore;

/// Catalog ingestion and maintenance on top of a shared store.
pub struct Registrar<S: FingerprintStore + ?Sized> {
    store: Arc<S>,
    fingerprinter: Fingerprinter,
}

impl<S: FingerprintStore + ?Sized> Registrar<S> {
    pub fn new(store: Arc<S>, fingerprinter: Fingerprinter) -> Self {
        Self {
            store,
            fingerprinter,
        }
    }

    pub fn fingerprinter(&self) -> &Fingerprinter {
        &self.fingerprinter
    }

    fn reject_duplicate(&self, song: &NewSong) -> Result<()> {
        if let Some(existing) = self.store.song_by_key(&song.lookup_key())? {
            warn!(
                song_id = existing.id,
                title = %song.title,
                artist = %song.artist,
                "song already in catalog"
            );
            return Err(Error::Duplicate {
                title: song.title.clone(),
                artist: song.artist.clone(),
                song_id: existing.id,
            });
        }
        Ok(())
    }

    /// Fingerprints `pcm` and stores it under a new song id.
    ///
    /// Duplicates are rejected before any audio work. Audio that yields no hashes is
    /// `Error::UnusableAudio` and leaves the store untouched.
    pub fn register_pcm(&self, song: &NewSong, pcm: &PcmBuffer) -> Result<Song> {
        self.reject_duplicate(song)?;
        let fingerprint = self.fingerprinter.fingerprint(pcm)?;
        self.store_fingerprint(song, &fingerprint)
    }

    /// Stores an already computed fingerprint.
    pub fn register_fingerprint(&self, song: &NewSong, fingerprint: &Fingerprint) -> Result<Song> {
        self.reject_duplicate(song)?;
        self.store_fingerprint(song, fingerprint)
    }

    fn store_fingerprint(&self, song: &NewSong, fingerprint: &Fingerprint) -> Result<Song> {
        if fingerprint.is_empty() {
            warn!(title = %song.title, artist = %song.artist, "no hashes extracted");
            return Err(Error::UnusableAudio);
        }
        // a concurrent registration can still win the key; the store rejects it atomically
        let stored = self.store.put(song, fingerprint)?;
        info!(
            song_id = stored.id,
            hashes = fingerprint.len(),
            key = %stored.lookup_key,
            "registered song"
        );
        Ok(stored)
    }

    pub fn delete(&self, song_id: SongId) -> Result<()> {
        if !self.store.delete_song(song_id)? {
            return Err(Error::SongNotFound(song_id));
        }
        Ok(())
    }

    pub fn backfill_external_ref(&self, song_id: SongId, external_ref: &str) -> Result<()> {
        if !self.store.set_external_ref(song_id, external_ref)? {
            return Err(Error::SongNotFound(song_id));
        }
        info!(song_id, external_ref, "external reference set");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::store::MemoryStore;

    fn registrar() -> (Arc<MemoryStore>, Registrar<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let fingerprinter = Fingerprinter::new(EngineConfig::default()).unwrap();
        (store.clone(), Registrar::new(store, fingerprinter))
    }

    fn fp() -> Fingerprint {
        (0..10).map(|i| (i, i)).collect()
    }

    #[test]
    fn duplicate_is_rejected_without_mutation() {
        let (store, registrar) = registrar();
        let first = registrar
            .register_fingerprint(&NewSong::new("Hello", "Adele"), &fp())
            .unwrap();

        let other: Fingerprint = (50..60).map(|i| (i, i)).collect();
        let err = registrar
            .register_fingerprint(&NewSong::new("hello ", "ADELE"), &other)
            .unwrap_err();
        assert!(matches!(err, Error::Duplicate { song_id, .. } if song_id == first.id));
        assert_eq!(
            err.to_string(),
            format!("'hello ' by 'ADELE' already exists in the catalog (song id {})", first.id)
        );
        assert_eq!(store.total_songs().unwrap(), 1);
        assert!(store.lookup(&[50]).unwrap().is_empty());
    }

    #[test]
    fn duplicate_pcm_is_rejected_before_fingerprinting() {
        let (_, registrar) = registrar();
        registrar
            .register_fingerprint(&NewSong::new("T", "A"), &fp())
            .unwrap();
        // would be UnusableAudio if it were fingerprinted
        let silence = PcmBuffer::mono(vec![0.0; 100], 11025).unwrap();
        let err = registrar
            .register_pcm(&NewSong::new("T", "A"), &silence)
            .unwrap_err();
        assert!(matches!(err, Error::Duplicate { .. }));
    }

    #[test]
    fn unusable_audio_leaves_no_song() {
        let (store, registrar) = registrar();
        let silence = PcmBuffer::mono(vec![0.0; 11025 * 2], 11025).unwrap();
        let err = registrar
            .register_pcm(&NewSong::new("Quiet", "Nobody"), &silence)
            .unwrap_err();
        assert!(matches!(err, Error::UnusableAudio));
        assert_eq!(store.total_songs().unwrap(), 0);
        assert!(store.song_by_key("quiet---nobody").unwrap().is_none());
    }

    #[test]
    fn delete_missing_song_is_not_found() {
        let (_, registrar) = registrar();
        assert!(matches!(registrar.delete(42), Err(Error::SongNotFound(42))));
    }

    #[test]
    fn delete_then_reregister() {
        let (store, registrar) = registrar();
        let song = registrar
            .register_fingerprint(&NewSong::new("T", "A"), &fp())
            .unwrap();
        registrar.delete(song.id).unwrap();
        assert!(store.lookup(&[0, 1, 2]).unwrap().is_empty());
        let again = registrar
            .register_fingerprint(&NewSong::new("T", "A"), &fp())
            .unwrap();
        assert_ne!(again.id, song.id);
    }

    #[test]
    fn backfill_sets_reference() {
        let (store, registrar) = registrar();
        let song = registrar
            .register_fingerprint(&NewSong::new("T", "A"), &fp())
            .unwrap();
        registrar.backfill_external_ref(song.id, "abc").unwrap();
        assert_eq!(store.all_external_refs().unwrap(), vec!["abc".to_string()]);
        assert!(matches!(
            registrar.backfill_external_ref(song.id + 1, "x"),
            Err(Error::SongNotFound(_))
        ));
    }
}

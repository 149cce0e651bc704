// src/lib.rs
//! Landmark-hash audio fingerprinting: PCM to spectral peaks to anchor/target hashes,
//! an inverted index of those hashes, and offset-alignment matching against it.

pub mod audio;
pub mod audio_loader;
pub mod config;
pub mod error;
pub mod fallback;
pub mod fingerprinter;
pub mod hashing;
pub mod logging;
pub mod matcher;
pub mod models;
pub mod peaks;
pub mod protocol;
pub mod registrar;
pub mod spectrogram;
pub mod store;

pub use audio::PcmBuffer;
pub use config::{EngineConfig, MatchConfig};
pub use error::{Error, ErrorKind, Result};
pub use fingerprinter::Fingerprinter;
pub use hashing::Fingerprint;
pub use matcher::{MatchOptions, Matcher, Ranking, RankingStatus};
pub use models::{IndexRecord, MatchResult, NewSong, Song, SongId};
pub use registrar::Registrar;
pub use store::{FingerprintStore, MemoryStore, SqliteStore};

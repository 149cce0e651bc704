// src/main.rs

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use sivana::audio_loader::load_audio_file;
use sivana::protocol::{QueryRequest, QueryResponse, StatusMessage};
use sivana::{
    EngineConfig, FingerprintStore, Fingerprinter, Matcher, NewSong, Registrar,
    Result, SqliteStore,
};

const DEFAULT_DB: &str = "sivana_fingerprints.sqlite";

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio fingerprint catalog and matcher", long_about = None)]
struct Cli {
    /// SQLite database holding the catalog
    #[arg(long, global = true, default_value = DEFAULT_DB)]
    db: PathBuf,

    /// JSON engine configuration; defaults are used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Also write daily-rotated logs here
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fingerprint an audio file and add it to the catalog
    Ingest {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(long)]
        title: String,
        #[arg(long)]
        artist: String,
        #[arg(long)]
        external_ref: Option<String>,
    },
    /// Identify an audio clip
    Query {
        #[arg(short, long)]
        file: PathBuf,
        /// Maximum number of matches
        #[arg(long)]
        top: Option<usize>,
        #[arg(long)]
        min_score: Option<usize>,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Answer a JSON query request (`{"fingerprint": {...}}`) read from a file
    Match {
        #[arg(long)]
        payload: PathBuf,
    },
    /// Print the number of songs in the catalog
    Songs,
    /// Print every stored external reference
    Refs,
    /// Remove a song and all of its fingerprints
    Delete {
        #[arg(long)]
        song_id: u32,
    },
    /// Set the external reference of a song
    SetRef {
        #[arg(long)]
        song_id: u32,
        #[arg(long)]
        external_ref: String,
    },
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => Ok(EngineConfig::default()),
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let store = Arc::new(
        SqliteStore::open(&cli.db)?.with_lookup_chunk(config.matching.lookup_shard_size),
    );
    let fingerprinter = Fingerprinter::new(config.clone())?;

    match cli.command {
        Command::Ingest {
            file,
            title,
            artist,
            external_ref,
        } => {
            let pcm = load_audio_file(&file)?;
            let mut song = NewSong::new(title, artist);
            if let Some(external_ref) = external_ref {
                song = song.with_external_ref(external_ref);
            }
            let registrar = Registrar::new(store, fingerprinter);
            let stored = registrar.register_pcm(&song, &pcm)?;
            let message = format!(
                "'{}' by '{}' was added as song {}",
                stored.title, stored.artist, stored.id
            );
            println!("{}", StatusMessage::success(message).to_json()?);
        }
        Command::Query {
            file,
            top,
            min_score,
            timeout_ms,
        } => {
            let pcm = load_audio_file(&file)?;
            let query = fingerprinter.fingerprint(&pcm)?;
            let matcher = Matcher::new(store, config.matching.clone());

            let mut options = matcher.default_options();
            if let Some(top) = top {
                options.max_results = top;
            }
            if let Some(min_score) = min_score {
                options.min_score = min_score;
            }
            if let Some(ms) = timeout_ms {
                options = options.with_timeout(Duration::from_millis(ms));
            }

            let ranking = matcher.find_matches_with(&query, &options)?;
            if ranking.is_empty() {
                println!("No match.");
            }
            let frame_seconds = config.frame_seconds();
            for (rank, m) in ranking.matches.iter().enumerate() {
                println!(
                    "{:>2}. [{}] '{}' by '{}'  score {}  ({} shared hashes, at {:.1}s)",
                    rank + 1,
                    m.song.id,
                    m.song.title,
                    m.song.artist,
                    m.score,
                    m.matched_hashes,
                    m.offset_frames as f64 * frame_seconds
                );
            }
            if ranking.timed_out() {
                println!("(timed out, ranking is partial)");
            }
        }
        Command::Match { payload } => {
            let request = QueryRequest::from_json(&fs::read_to_string(&payload)?)?;
            let matcher = Matcher::new(store, config.matching.clone());
            let ranking = matcher.find_matches(&request.fingerprint)?;
            println!("{}", QueryResponse::from(&ranking).to_json()?);
        }
        Command::Songs => {
            println!("{}", store.total_songs()?);
        }
        Command::Refs => {
            println!("{}", serde_json::to_string(&store.all_external_refs()?)?);
        }
        Command::Delete { song_id } => {
            Registrar::new(store, fingerprinter).delete(song_id)?;
            println!("{}", StatusMessage::success(format!("song {} deleted", song_id)).to_json()?);
        }
        Command::SetRef {
            song_id,
            external_ref,
        } => {
            Registrar::new(store, fingerprinter).backfill_external_ref(song_id, &external_ref)?;
            println!(
                "{}",
                StatusMessage::success(format!("song {} now refers to {}", song_id, external_ref))
                    .to_json()?
            );
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _log_guard = sivana::logging::init(&cli.log_level, cli.log_dir.as_deref());

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // internal details are logged by from_error and never printed
            eprintln!("{}", StatusMessage::from_error(&e).message);
            ExitCode::FAILURE
        }
    }
}

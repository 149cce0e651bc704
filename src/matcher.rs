// src/matcher.rs
use std::cmp::{Ordering, Reverse};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::MatchConfig;
use crate::error::Result;
use crate::hashing::Fingerprint;
use crate::models::{MatchResult, SongId};
use crate::store::FingerprintStore;

/// Per-query knobs. Built from [`MatchConfig`] and narrowed by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOptions {
    pub min_score: usize,
    pub max_results: usize,
    pub deadline: Option<Instant>,
}

impl MatchOptions {
    pub fn from_config(config: &MatchConfig) -> Self {
        Self {
            min_score: config.min_score,
            max_results: config.max_results,
            deadline: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingStatus {
    Complete,
    /// The deadline passed; only candidates scored before it are ranked.
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ranking {
    pub matches: Vec<MatchResult>,
    pub status: RankingStatus,
}

impl Ranking {
    fn complete(matches: Vec<MatchResult>) -> Self {
        Self {
            matches,
            status: RankingStatus::Complete,
        }
    }

    pub fn best(&self) -> Option<&MatchResult> {
        self.matches.first()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn timed_out(&self) -> bool {
        self.status == RankingStatus::TimedOut
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    song_id: SongId,
    score: usize,
    matched_hashes: usize,
    offset_frames: i64,
}

impl Candidate {
    // score desc, then matched hashes desc, then song id asc
    fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .cmp(&self.score)
            .then_with(|| other.matched_hashes.cmp(&self.matched_hashes))
            .then_with(|| self.song_id.cmp(&other.song_id))
    }
}

/// Builds the delta histogram of one song and keeps its tallest bin.
/// Equal bins resolve to the smallest delta.
fn score_candidate(song_id: SongId, deltas: &[i64]) -> Candidate {
    let mut histogram: HashMap<i64, usize> = HashMap::new();
    for &delta in deltas {
        *histogram.entry(delta).or_insert(0) += 1;
    }
    let (offset_frames, score) = histogram
        .into_iter()
        .max_by_key(|&(delta, count)| (count, Reverse(delta)))
        .unwrap_or((0, 0));

    Candidate {
        song_id,
        score,
        matched_hashes: deltas.len(),
        offset_frames,
    }
}

/// Ranks catalog songs against a query fingerprint by offset alignment.
pub struct Matcher<S: FingerprintStore + ?Sized> {
    store: Arc<S>,
    config: MatchConfig,
}

impl<S: FingerprintStore + ?Sized> Matcher<S> {
    pub fn new(store: Arc<S>, config: MatchConfig) -> Self {
        Self { store, config }
    }

    pub fn default_options(&self) -> MatchOptions {
        MatchOptions::from_config(&self.config)
    }

    pub fn find_matches(&self, query: &Fingerprint) -> Result<Ranking> {
        self.find_matches_with(query, &self.default_options())
    }

    pub fn find_matches_with(&self, query: &Fingerprint, options: &MatchOptions) -> Result<Ranking> {
        if query.is_empty() {
            debug!("empty query fingerprint");
            return Ok(Ranking::complete(Vec::new()));
        }
        let started = Instant::now();

        let hashes: Vec<u32> = query.hashes().collect();
        let records = self.store.lookup(&hashes)?;
        if options.expired() {
            warn!(hashes = hashes.len(), "match deadline passed during lookup");
            return Ok(Ranking {
                matches: Vec::new(),
                status: RankingStatus::TimedOut,
            });
        }

        let mut deltas_by_song: HashMap<SongId, Vec<i64>> = HashMap::new();
        for (hash, records) in &records {
            let Some(query_offset) = query.get(*hash) else {
                continue;
            };
            for record in records {
                deltas_by_song
                    .entry(record.song_id)
                    .or_default()
                    .push(record.offset as i64 - query_offset as i64);
            }
        }
        if deltas_by_song.is_empty() {
            debug!(hashes = hashes.len(), "no candidate shares a hash with the query");
            return Ok(Ranking::complete(Vec::new()));
        }

        // ascending id, so a deadline cut keeps a reproducible prefix
        let mut candidates: Vec<(SongId, Vec<i64>)> = deltas_by_song.into_iter().collect();
        candidates.sort_unstable_by_key(|(song_id, _)| *song_id);

        let timed_out = AtomicBool::new(false);
        let score_or_stop = |(song_id, deltas): &(SongId, Vec<i64>)| {
            if options.expired() {
                timed_out.store(true, AtomicOrdering::Relaxed);
                return None;
            }
            Some(score_candidate(*song_id, deltas))
        };

        let mut scored: Vec<Candidate> = if candidates.len() >= self.config.parallel_threshold {
            candidates.par_iter().filter_map(score_or_stop).collect()
        } else {
            candidates.iter().map_while(score_or_stop).collect()
        };
        let scoring_cut = timed_out.into_inner();

        scored.retain(|c| c.score >= options.min_score);
        scored.sort_unstable_by(Candidate::rank_cmp);

        let (matches, resolve_cut) = self.resolve(&scored, options)?;
        let status = if scoring_cut || resolve_cut {
            warn!(
                scored = scored.len(),
                candidates = candidates.len(),
                "match deadline passed; ranking is partial"
            );
            RankingStatus::TimedOut
        } else {
            RankingStatus::Complete
        };

        info!(
            query_hashes = hashes.len(),
            candidates = candidates.len(),
            matches = matches.len(),
            best_score = matches.first().map_or(0, |m| m.score),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query matched"
        );
        Ok(Ranking { matches, status })
    }

    /// Attaches song metadata in rank order. Songs deleted since the lookup are skipped.
    /// The flag is set when the deadline stopped resolution early.
    fn resolve(
        &self,
        ranked: &[Candidate],
        options: &MatchOptions,
    ) -> Result<(Vec<MatchResult>, bool)> {
        let max_results = options.max_results;
        let mut matches = Vec::with_capacity(max_results.min(ranked.len()));
        for candidate in ranked {
            if matches.len() >= max_results {
                break;
            }
            if options.expired() {
                return Ok((matches, true));
            }
            match self.store.song_by_id(candidate.song_id)? {
                Some(song) => matches.push(MatchResult {
                    song,
                    score: candidate.score,
                    matched_hashes: candidate.matched_hashes,
                    offset_frames: candidate.offset_frames,
                }),
                None => debug!(song_id = candidate.song_id, "candidate vanished before resolution"),
            }
        }
        Ok((matches, false))
    }
}

// src/hashing.rs
use std::collections::btree_map::{BTreeMap, Entry};
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::HashConfig;
use crate::peaks::Peak;

// 10 + 10 + 12 bits: anchor bin | target bin | frame delta
pub const FREQ_BITS: u32 = 10;
pub const DELTA_BITS: u32 = 12;
const FREQ_MASK: u32 = (1 << FREQ_BITS) - 1;
const DELTA_MASK: u32 = (1 << DELTA_BITS) - 1;

/// Packs an anchor/target pair. Absolute time is left out on purpose: the same pair
/// hashes identically wherever it occurs in a recording.
pub fn pack_hash(anchor_bin: usize, target_bin: usize, delta_frames: usize) -> u32 {
    let f1 = anchor_bin as u32 & FREQ_MASK;
    let f2 = target_bin as u32 & FREQ_MASK;
    let dt = delta_frames as u32 & DELTA_MASK;
    (f1 << (FREQ_BITS + DELTA_BITS)) | (f2 << DELTA_BITS) | dt
}

/// `hash -> anchor offset` for one recording. When a hash repeats, the first
/// (earliest) offset is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint {
    entries: BTreeMap<u32, u32>,
}

impl Fingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the hash was already present; the stored offset is unchanged.
    pub fn insert(&mut self, hash: u32, offset: u32) -> bool {
        match self.entries.entry(hash) {
            Entry::Vacant(slot) => {
                slot.insert(offset);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    pub fn get(&self, hash: u32) -> Option<u32> {
        self.entries.get(&hash).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hashes(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.entries.iter().map(|(&h, &o)| (h, o))
    }

    /// Copy with every offset moved back by `frames` (entries before the cut are dropped).
    pub fn shifted_back(&self, frames: u32) -> Fingerprint {
        self.iter()
            .filter(|&(_, offset)| offset >= frames)
            .map(|(hash, offset)| (hash, offset - frames))
            .collect()
    }
}

impl FromIterator<(u32, u32)> for Fingerprint {
    fn from_iter<I: IntoIterator<Item = (u32, u32)>>(iter: I) -> Self {
        let mut fingerprint = Fingerprint::new();
        for (hash, offset) in iter {
            fingerprint.insert(hash, offset);
        }
        fingerprint
    }
}

impl From<BTreeMap<u32, u32>> for Fingerprint {
    fn from(entries: BTreeMap<u32, u32>) -> Self {
        Self { entries }
    }
}

fn pair_anchor<'a>(
    anchor: &Peak,
    targets: impl Iterator<Item = &'a Peak>,
    config: &HashConfig,
    fingerprint: &mut Fingerprint,
) {
    let mut pairs = 0;
    for target in targets {
        if pairs >= config.fan_out {
            break;
        }
        let delta_time = target.time_idx - anchor.time_idx;
        if delta_time > config.max_time_delta {
            break;
        }
        if delta_time < config.min_time_delta {
            continue;
        }
        if anchor.freq_bin_idx.abs_diff(target.freq_bin_idx) > config.max_freq_delta {
            continue;
        }

        let hash = pack_hash(anchor.freq_bin_idx, target.freq_bin_idx, delta_time);
        fingerprint.insert(hash, anchor.time_idx as u32);
        pairs += 1;
    }
}

/// Pairs each anchor with up to `fan_out` later peaks inside its target zone.
///
/// Peaks must arrive in ascending time order. Only peaks within `max_time_delta` of the
/// oldest pending anchor are buffered.
pub fn create_hashes(peaks: impl IntoIterator<Item = Peak>, config: &HashConfig) -> Fingerprint {
    let mut fingerprint = Fingerprint::new();
    let mut window: VecDeque<Peak> = VecDeque::new();
    let mut peak_count = 0usize;

    for peak in peaks {
        debug_assert!(window.back().is_none_or(|last| last.time_idx <= peak.time_idx));
        peak_count += 1;

        // every target of the front anchor has been seen once a peak lands past its zone
        while window
            .front()
            .is_some_and(|anchor| peak.time_idx - anchor.time_idx > config.max_time_delta)
        {
            if let Some(anchor) = window.pop_front() {
                pair_anchor(&anchor, window.iter(), config, &mut fingerprint);
            }
        }
        window.push_back(peak);
    }
    while let Some(anchor) = window.pop_front() {
        pair_anchor(&anchor, window.iter(), config, &mut fingerprint);
    }

    debug!(peaks = peak_count, hashes = fingerprint.len(), "hashed peaks");
    fingerprint
}

// src/config.rs

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::hashing::{DELTA_BITS, FREQ_BITS};

/// Every tunable of the pipeline. Fields missing from a config file keep their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub audio: AudioConfig,
    pub spectrogram: SpectrogramConfig,
    pub peaks: PeakConfig,
    pub hashing: HashConfig,
    pub matching: MatchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// All audio is resampled to this rate before analysis.
    pub sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self { sample_rate: 11025 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrogramConfig {
    pub window_size: usize,
    pub hop_size: usize,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            window_size: 1024,
            hop_size: 512,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakConfig {
    pub time_radius: usize,
    pub freq_radius: usize,
    /// Absolute floor; anything quieter is never a peak. Keeps digital silence empty.
    pub min_magnitude: f32,
    /// Fraction of the loudest bin of the whole clip below which nothing is a peak.
    pub relative_floor: f32,
    /// Exclusive upper bin of each loudness band. The last band is stretched to the top bin.
    pub band_edges: Vec<usize>,
    /// A peak must reach this multiple of its band's mean magnitude in the same frame.
    pub band_threshold_ratio: f32,
    /// Strongest peaks kept per band and frame.
    pub peaks_per_band: usize,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            time_radius: 2,
            freq_radius: 5,
            min_magnitude: 1e-3,
            relative_floor: 0.01,
            band_edges: vec![10, 20, 40, 80, 160, 512],
            band_threshold_ratio: 1.5,
            peaks_per_band: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashConfig {
    /// Targets paired with each anchor.
    pub fan_out: usize,
    pub min_time_delta: usize,
    pub max_time_delta: usize,
    pub max_freq_delta: usize,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            fan_out: 5,
            min_time_delta: 1,
            max_time_delta: 100,
            max_freq_delta: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub min_score: usize,
    pub max_results: usize,
    /// Candidate count from which histogram scoring runs on the rayon pool.
    pub parallel_threshold: usize,
    /// Hashes per rayon task in `MemoryStore` lookups and per `IN (...)` statement in
    /// `SqliteStore` lookups.
    pub lookup_shard_size: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            min_score: 5,
            max_results: 10,
            parallel_threshold: 64,
            lookup_shard_size: 500,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        info!(path = %path.display(), "loaded engine config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(Error::Config(msg));

        if self.audio.sample_rate == 0 {
            return bad("sample_rate must be > 0".into());
        }
        let spec = &self.spectrogram;
        if spec.window_size < 2 {
            return bad("window_size must be at least 2".into());
        }
        if spec.window_size / 2 >= 1 << FREQ_BITS {
            return bad(format!(
                "window_size {} yields bins that do not fit in {} hash bits",
                spec.window_size, FREQ_BITS
            ));
        }
        if spec.hop_size == 0 || spec.hop_size > spec.window_size {
            return bad("hop_size must be in 1..=window_size".into());
        }
        if !(self.peaks.min_magnitude.is_finite() && self.peaks.min_magnitude > 0.0) {
            return bad("min_magnitude must be a positive number".into());
        }
        if !(self.peaks.relative_floor >= 0.0 && self.peaks.relative_floor < 1.0) {
            return bad("relative_floor must be in 0..1".into());
        }
        if self.peaks.peaks_per_band == 0 {
            return bad("peaks_per_band must be > 0".into());
        }
        if !(self.peaks.band_threshold_ratio.is_finite() && self.peaks.band_threshold_ratio >= 0.0)
        {
            return bad("band_threshold_ratio must be a non-negative number".into());
        }
        if self.peaks.band_edges.is_empty() || self.peaks.band_edges.windows(2).any(|w| w[0] >= w[1])
        {
            return bad("band_edges must be non-empty and strictly increasing".into());
        }
        let hashing = &self.hashing;
        if hashing.fan_out == 0 {
            return bad("fan_out must be > 0".into());
        }
        if hashing.min_time_delta > hashing.max_time_delta {
            return bad("min_time_delta must not exceed max_time_delta".into());
        }
        if hashing.max_time_delta >= 1 << DELTA_BITS {
            return bad(format!(
                "max_time_delta {} does not fit in {} hash bits",
                hashing.max_time_delta, DELTA_BITS
            ));
        }
        if self.matching.max_results == 0 || self.matching.lookup_shard_size == 0 {
            return bad("max_results and lookup_shard_size must be > 0".into());
        }
        Ok(())
    }

    /// Seconds covered by one hop, i.e. one unit of a fingerprint offset.
    pub fn frame_seconds(&self) -> f64 {
        self.spectrogram.hop_size as f64 / self.audio.sample_rate as f64
    }
}

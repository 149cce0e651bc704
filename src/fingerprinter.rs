// src/fingerprinter.rs
use tracing::{debug, info};

use crate::audio::{PcmBuffer, resample};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::hashing::{Fingerprint, create_hashes};
use crate::peaks::find_peaks;
use crate::spectrogram::create_spectrogram;

/// PCM in, fingerprint out. The same instance is used for ingestion and queries so both
/// sides always agree on every parameter.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    config: EngineConfig,
}

impl Fingerprinter {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Downmixes, resamples to the analysis rate and hashes the result.
    ///
    /// Audio too short for a single analysis window yields an empty fingerprint; callers
    /// decide whether that is an error.
    pub fn fingerprint(&self, pcm: &PcmBuffer) -> Result<Fingerprint> {
        let target_rate = self.config.audio.sample_rate;
        let window_size = self.config.spectrogram.window_size;

        let mono = pcm.to_mono();
        // one analysis window, measured at the source rate
        let min_source_samples =
            (window_size as u64 * pcm.sample_rate() as u64).div_ceil(target_rate as u64);
        if (mono.len() as u64) < min_source_samples {
            debug!(
                samples = mono.len(),
                needed = min_source_samples,
                "audio shorter than one analysis window"
            );
            return Ok(Fingerprint::new());
        }

        let samples = resample(mono, pcm.sample_rate(), target_rate)?;
        let fingerprint = self.fingerprint_samples(&samples);
        info!(
            duration_secs = pcm.duration_secs(),
            channels = pcm.channels(),
            hashes = fingerprint.len(),
            "fingerprinted audio"
        );
        Ok(fingerprint)
    }

    /// Mono samples already at the analysis rate.
    pub fn fingerprint_samples(&self, samples: &[f32]) -> Fingerprint {
        let spectrogram = create_spectrogram(samples, &self.config.spectrogram);
        let peaks = find_peaks(&spectrogram, &self.config.peaks);
        create_hashes(peaks, &self.config.hashing)
    }
}

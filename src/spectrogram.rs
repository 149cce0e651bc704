// src/spectrogram.rs
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use std::f32::consts::PI;
use tracing::debug;

use crate::config::SpectrogramConfig;

/// Magnitude grid, one row per hop, `window_size / 2 + 1` bins per row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Spectrogram {
    frames: Vec<Vec<f32>>,
    num_bins: usize,
}

impl Spectrogram {
    /// Wraps precomputed rows; all rows must have the same length.
    pub fn from_frames(frames: Vec<Vec<f32>>) -> Self {
        let num_bins = frames.first().map_or(0, Vec::len);
        debug_assert!(frames.iter().all(|f| f.len() == num_bins));
        Self { frames, num_bins }
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame(&self, t: usize) -> &[f32] {
        &self.frames[t]
    }

    /// Loudest bin across all frames; 0 for an empty grid.
    pub fn max_magnitude(&self) -> f32 {
        self.frames
            .iter()
            .flatten()
            .fold(0.0f32, |loudest, &m| loudest.max(m))
    }
}

fn hann_window(window_size: usize) -> Vec<f32> {
    if window_size <= 1 {
        return vec![1.0; window_size];
    }
    (0..window_size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (window_size - 1) as f32).cos()))
        .collect()
}

/// Short-time Fourier transform of mono samples. Input shorter than one window gives
/// an empty spectrogram.
pub fn create_spectrogram(samples: &[f32], config: &SpectrogramConfig) -> Spectrogram {
    let window_size = config.window_size;
    let hop_size = config.hop_size;

    if window_size == 0 || hop_size == 0 || samples.len() < window_size {
        debug!(samples = samples.len(), window_size, "not enough samples for a full window");
        return Spectrogram::default();
    }

    let num_frames = (samples.len() - window_size) / hop_size + 1;
    let num_bins = window_size / 2 + 1;
    debug!(samples = samples.len(), window_size, hop_size, num_frames, "computing spectrogram");

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(window_size);
    let mut buffer = vec![Complex::new(0.0, 0.0); window_size];
    let window_values = hann_window(window_size);

    let mut frames = Vec::with_capacity(num_frames);
    for i in 0..num_frames {
        let start = i * hop_size;
        let chunk = &samples[start..start + window_size];

        for (slot, (sample, w)) in buffer.iter_mut().zip(chunk.iter().zip(&window_values)) {
            *slot = Complex::new(sample * w, 0.0);
        }
        fft.process(&mut buffer);

        frames.push(buffer[..num_bins].iter().map(|c| c.norm()).collect());
    }

    Spectrogram { frames, num_bins }
}

// src/audio.rs

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

use crate::error::{Error, Result};

/// Interleaved PCM as handed over by a client or a decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl PcmBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::UnsupportedFormat("sample rate must be > 0".into()));
        }
        if channels == 0 {
            return Err(Error::UnsupportedFormat("channel count must be > 0".into()));
        }
        if samples.len() % channels as usize != 0 {
            return Err(Error::UnsupportedFormat(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                channels
            )));
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(Error::UnsupportedFormat("samples must be finite".into()));
        }
        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        Self::new(samples, sample_rate, 1)
    }

    /// Decodes little-endian integer PCM. 8-bit audio is unsigned, wider formats are signed.
    pub fn from_le_bytes(
        bytes: &[u8],
        bits_per_sample: u16,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self> {
        let width = match bits_per_sample {
            8 | 16 | 24 | 32 => bits_per_sample as usize / 8,
            other => {
                return Err(Error::UnsupportedFormat(format!(
                    "unsupported bit depth: {}",
                    other
                )));
            }
        };
        if bytes.len() % width != 0 {
            return Err(Error::UnsupportedFormat(format!(
                "{} bytes are not a whole number of {}-bit samples",
                bytes.len(),
                bits_per_sample
            )));
        }

        let samples = bytes
            .chunks_exact(width)
            .map(|b| match width {
                1 => (b[0] as f32 - 128.0) / 128.0,
                2 => i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32,
                // sign-extend the 24-bit value through the top byte of an i32
                3 => (i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8) as f32 / (1 << 23) as f32,
                _ => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / i32::MAX as f32,
            })
            .collect();

        Self::new(samples, sample_rate, channels)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f32 {
        self.frames() as f32 / self.sample_rate as f32
    }

    /// Averages all channels into one.
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels == 1 {
            return self.samples.clone();
        }
        self.samples
            .chunks_exact(self.channels as usize)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    }
}

/// Resamples mono audio with a windowed-sinc interpolator.
pub fn resample(samples: Vec<f32>, from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples);
    }
    debug!(from_rate, to_rate, samples = samples.len(), "resampling");

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };
    let waves_in = vec![samples];
    let mut resampler = SincFixedIn::<f32>::new(
        to_rate as f64 / from_rate as f64,
        2.0,
        params,
        waves_in[0].len(),
        1,
    )
    .map_err(|e| Error::Resample(format!("{:?}", e)))?;

    let waves_out = resampler
        .process(&waves_in, None)
        .map_err(|e| Error::Resample(format!("{:?}", e)))?;

    waves_out
        .into_iter()
        .next()
        .ok_or_else(|| Error::Resample("resampler produced no channel".into()))
}

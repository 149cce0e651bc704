#![allow(dead_code)]

use std::f32::consts::PI;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use sivana::{EngineConfig, FingerprintStore, Fingerprinter, PcmBuffer, Registrar};

pub const RATE: u32 = 11025;
pub const HOP: usize = 512;

/// Two random tones held for a quarter second each, from a fixed seed.
pub fn synthetic_song(seed: u64, seconds: f32) -> Vec<f32> {
    synthetic_song_between(seed, seconds, 300.0, 2500.0)
}

/// Same construction with tone frequencies drawn from `low..high` Hz.
pub fn synthetic_song_between(seed: u64, seconds: f32, low: f32, high: f32) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let step = RATE as usize / 4;
    let total = (seconds * RATE as f32) as usize;

    let mut samples = Vec::with_capacity(total);
    let (mut a, mut b) = (0.0f32, 0.0f32);
    for n in 0..total {
        if n % step == 0 {
            a = rng.random_range(low..high);
            b = rng.random_range(low..high);
        }
        let t = n as f32 / RATE as f32;
        samples.push(0.3 * (2.0 * PI * a * t).sin() + 0.3 * (2.0 * PI * b * t).sin());
    }
    samples
}

/// Adds seeded uniform noise in `-amplitude..amplitude`.
pub fn with_noise(samples: &[f32], seed: u64, amplitude: f32) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    samples
        .iter()
        .map(|s| s + rng.random_range(-amplitude..amplitude))
        .collect()
}

pub fn pcm(samples: Vec<f32>) -> PcmBuffer {
    PcmBuffer::mono(samples, RATE).unwrap()
}

pub fn fingerprinter() -> Fingerprinter {
    Fingerprinter::new(EngineConfig::default()).unwrap()
}

pub fn registrar<S: FingerprintStore + ?Sized>(store: Arc<S>) -> Registrar<S> {
    Registrar::new(store, fingerprinter())
}

// src/peaks.rs
use std::iter::FusedIterator;
use std::ops::Range;

use tracing::trace;

use crate::config::PeakConfig;
use crate::spectrogram::Spectrogram;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub time_idx: usize,
    pub freq_bin_idx: usize,
    pub magnitude: f32,
}

/// Peaks of a spectrogram in ascending time order (ascending bin within a frame),
/// computed one frame at a time as the iterator is pulled.
pub struct Peaks<'a> {
    spectrogram: &'a Spectrogram,
    config: &'a PeakConfig,
    floor: f32,
    next_frame: usize,
    pending: std::vec::IntoIter<Peak>,
}

pub fn find_peaks<'a>(spectrogram: &'a Spectrogram, config: &'a PeakConfig) -> Peaks<'a> {
    let floor = config
        .min_magnitude
        .max(config.relative_floor * spectrogram.max_magnitude());
    Peaks {
        spectrogram,
        config,
        floor,
        next_frame: 0,
        pending: Vec::new().into_iter(),
    }
}

/// Splits `0..num_bins` at the configured edges; the last band runs to the top bin.
fn band_ranges(edges: &[usize], num_bins: usize) -> Vec<Range<usize>> {
    let mut bands = Vec::with_capacity(edges.len() + 1);
    let mut start = 0;
    for (i, &edge) in edges.iter().enumerate() {
        let end = if i + 1 == edges.len() {
            num_bins
        } else {
            edge.min(num_bins)
        };
        if start < end {
            bands.push(start..end);
            start = end;
        }
    }
    if start < num_bins {
        bands.push(start..num_bins);
    }
    bands
}

impl Peaks<'_> {
    fn is_local_max(&self, t_idx: usize, f_idx: usize, magnitude: f32) -> bool {
        let spec = self.spectrogram;
        let t_start = t_idx.saturating_sub(self.config.time_radius);
        let t_end = (t_idx + self.config.time_radius + 1).min(spec.num_frames());
        let f_start = f_idx.saturating_sub(self.config.freq_radius);
        let f_end = (f_idx + self.config.freq_radius + 1).min(spec.num_bins());

        for nt_idx in t_start..t_end {
            let row = spec.frame(nt_idx);
            for (nf_idx, &other) in row.iter().enumerate().take(f_end).skip(f_start) {
                if nt_idx == t_idx && nf_idx == f_idx {
                    continue;
                }
                if other > magnitude {
                    return false;
                }
                // plateaus keep only their earliest, lowest bin
                if other == magnitude && (nt_idx < t_idx || (nt_idx == t_idx && nf_idx < f_idx)) {
                    return false;
                }
            }
        }
        true
    }

    /// Keeps the strongest local maxima of each band that clear the clip floor, the band's
    /// adaptive threshold and the frame level (mean of the per-band maxima).
    fn frame_peaks(&self, t_idx: usize) -> Vec<Peak> {
        let frame = self.spectrogram.frame(t_idx);
        let bands = band_ranges(&self.config.band_edges, frame.len());
        if bands.is_empty() {
            return Vec::new();
        }

        let frame_level = bands
            .iter()
            .map(|band| frame[band.clone()].iter().fold(0.0f32, |m, &x| m.max(x)))
            .sum::<f32>()
            / bands.len() as f32;

        let mut peaks = Vec::new();
        for band in bands {
            let values = &frame[band.clone()];
            let band_mean = values.iter().sum::<f32>() / values.len() as f32;
            let threshold = (band_mean * self.config.band_threshold_ratio)
                .max(frame_level)
                .max(self.floor);

            let mut strongest: Vec<Peak> = band
                .filter(|&f_idx| {
                    frame[f_idx] >= threshold && self.is_local_max(t_idx, f_idx, frame[f_idx])
                })
                .map(|f_idx| Peak {
                    time_idx: t_idx,
                    freq_bin_idx: f_idx,
                    magnitude: frame[f_idx],
                })
                .collect();
            strongest.sort_by(|a, b| {
                b.magnitude
                    .total_cmp(&a.magnitude)
                    .then(a.freq_bin_idx.cmp(&b.freq_bin_idx))
            });
            strongest.truncate(self.config.peaks_per_band);
            strongest.sort_by_key(|p| p.freq_bin_idx);
            peaks.extend(strongest);
        }

        trace!(frame = t_idx, peaks = peaks.len(), "frame scanned");
        peaks
    }
}

impl Iterator for Peaks<'_> {
    type Item = Peak;

    fn next(&mut self) -> Option<Peak> {
        loop {
            if let Some(peak) = self.pending.next() {
                return Some(peak);
            }
            if self.next_frame >= self.spectrogram.num_frames() {
                return None;
            }
            self.pending = self.frame_peaks(self.next_frame).into_iter();
            self.next_frame += 1;
        }
    }
}

impl FusedIterator for Peaks<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PeakConfig {
        PeakConfig {
            time_radius: 1,
            freq_radius: 2,
            min_magnitude: 1.0,
            relative_floor: 0.0,
            band_edges: vec![4, 8],
            band_threshold_ratio: 1.5,
            peaks_per_band: 1,
        }
    }

    fn grid(frames: usize, bins: usize, fill: f32) -> Vec<Vec<f32>> {
        vec![vec![fill; bins]; frames]
    }

    #[test]
    fn silence_has_no_peaks() {
        let spec = Spectrogram::from_frames(grid(10, 8, 0.0));
        assert_eq!(find_peaks(&spec, &config()).count(), 0);
    }

    #[test]
    fn empty_spectrogram_has_no_peaks() {
        let spec = Spectrogram::default();
        assert!(find_peaks(&spec, &config()).next().is_none());
    }

    #[test]
    fn isolated_spike_is_found() {
        let mut frames = grid(5, 8, 0.1);
        frames[2][5] = 10.0;
        let spec = Spectrogram::from_frames(frames);
        let peaks: Vec<Peak> = find_peaks(&spec, &config()).collect();
        assert_eq!(peaks.len(), 1);
        assert_eq!((peaks[0].time_idx, peaks[0].freq_bin_idx), (2, 5));
        assert_eq!(peaks[0].magnitude, 10.0);
    }

    #[test]
    fn plateau_keeps_earliest_bin() {
        let mut frames = grid(5, 8, 0.1);
        frames[1][2] = 5.0;
        frames[2][2] = 5.0;
        frames[2][3] = 5.0;
        let spec = Spectrogram::from_frames(frames);
        let peaks: Vec<(usize, usize)> = find_peaks(&spec, &config())
            .map(|p| (p.time_idx, p.freq_bin_idx))
            .collect();
        assert_eq!(peaks, vec![(1, 2)]);
    }

    #[test]
    fn below_band_threshold_is_rejected() {
        // bins 4..8 are uniformly loud, so a small bump there does not clear 1.5x the band mean
        let mut frames = grid(3, 8, 0.0);
        for frame in frames.iter_mut() {
            for bin in &mut frame[4..8] {
                *bin = 4.0;
            }
        }
        frames[1][6] = 5.0;
        let spec = Spectrogram::from_frames(frames);
        assert_eq!(find_peaks(&spec, &config()).count(), 0);
    }

    #[test]
    fn faint_band_peak_yields_to_loud_frame() {
        // bin 1 is a local max of its band but far below the mean of the band maxima
        let mut frames = grid(3, 8, 0.0);
        frames[1][1] = 2.0;
        frames[1][4..8].copy_from_slice(&[10.0, 10.0, 80.0, 10.0]);
        let spec = Spectrogram::from_frames(frames);
        let bins: Vec<usize> = find_peaks(&spec, &config()).map(|p| p.freq_bin_idx).collect();
        assert_eq!(bins, vec![6]);
    }

    #[test]
    fn balanced_bands_each_yield_a_peak() {
        let mut frames = grid(3, 8, 0.0);
        frames[1][1] = 20.0;
        frames[1][6] = 20.0;
        let spec = Spectrogram::from_frames(frames);
        let bins: Vec<usize> = find_peaks(&spec, &config()).map(|p| p.freq_bin_idx).collect();
        assert_eq!(bins, vec![1, 6]);
    }

    #[test]
    fn band_keeps_only_its_strongest_peaks() {
        // bins 0 and 3 are both local maxima of band 0..4
        let mut frames = grid(3, 8, 0.0);
        frames[1][0] = 6.0;
        frames[1][3] = 9.0;
        let spec = Spectrogram::from_frames(frames.clone());
        let bins: Vec<usize> = find_peaks(&spec, &config()).map(|p| p.freq_bin_idx).collect();
        assert_eq!(bins, vec![3]);

        let two_per_band = PeakConfig {
            peaks_per_band: 2,
            ..config()
        };
        let bins: Vec<usize> = find_peaks(&spec, &two_per_band)
            .map(|p| p.freq_bin_idx)
            .collect();
        assert_eq!(bins, vec![0, 3]);
    }

    #[test]
    fn weak_maxima_beside_a_tone_are_dropped() {
        // a wandering spike in band 0..4 every frame, a loud tone at bin 6 every fifth frame
        let mut frames = grid(20, 8, 0.0);
        for (t, frame) in frames.iter_mut().enumerate() {
            frame[t % 4] = 3.0;
            if t % 5 == 2 {
                frame[6] = 50.0;
            }
        }
        let spec = Spectrogram::from_frames(frames);
        let in_tone_frames: Vec<(usize, usize)> = find_peaks(&spec, &config())
            .map(|p| (p.time_idx, p.freq_bin_idx))
            .filter(|&(t, _)| t % 5 == 2)
            .collect();
        assert_eq!(in_tone_frames, vec![(2, 6), (7, 6), (12, 6), (17, 6)]);
    }

    #[test]
    fn relative_floor_follows_clip_level() {
        let mut frames = grid(9, 8, 0.0);
        frames[1][2] = 10.0;
        frames[6][5] = 0.3;
        let quiet = PeakConfig {
            min_magnitude: 1e-6,
            relative_floor: 0.05,
            ..config()
        };

        let spec = Spectrogram::from_frames(frames.clone());
        let peaks: Vec<(usize, usize)> = find_peaks(&spec, &quiet)
            .map(|p| (p.time_idx, p.freq_bin_idx))
            .collect();
        assert_eq!(peaks, vec![(1, 2)]);

        // same shape at a thousandth of the level
        let scaled: Vec<Vec<f32>> = frames
            .iter()
            .map(|f| f.iter().map(|m| m * 1e-3).collect())
            .collect();
        let spec = Spectrogram::from_frames(scaled);
        let scaled_peaks: Vec<(usize, usize)> = find_peaks(&spec, &quiet)
            .map(|p| (p.time_idx, p.freq_bin_idx))
            .collect();
        assert_eq!(scaled_peaks, peaks);
    }

    #[test]
    fn peaks_come_out_in_time_order() {
        let mut frames = grid(12, 8, 0.0);
        frames[9][1] = 3.0;
        frames[2][6] = 7.0;
        frames[5][3] = 9.0;
        frames[5][7] = 9.0;
        let spec = Spectrogram::from_frames(frames);
        let order: Vec<(usize, usize)> = find_peaks(&spec, &config())
            .map(|p| (p.time_idx, p.freq_bin_idx))
            .collect();
        assert_eq!(order, vec![(2, 6), (5, 3), (5, 7), (9, 1)]);
    }

    #[test]
    fn deterministic_for_identical_input() {
        let mut frames = grid(6, 8, 0.2);
        frames[1][2] = 3.0;
        frames[4][6] = 6.0;
        let spec = Spectrogram::from_frames(frames);
        let a: Vec<Peak> = find_peaks(&spec, &config()).collect();
        let b: Vec<Peak> = find_peaks(&spec, &config()).collect();
        assert_eq!(a, b);
    }
}

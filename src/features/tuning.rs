//! Tuning estimation for the chroma filter bank.
//!
//! Finds spectral peaks in the 150 Hz to 4 kHz range, refines each peak with
//! parabolic interpolation, and histograms how far the strongest peaks sit
//! from the equal-tempered grid. The most populated deviation is the tuning
//! offset, in fractions of a chroma bin, within `[-0.5, 0.5)`.

use super::filters::{fft_frequencies, hz_to_octs};
use super::stft::Spectrogram;

const PITCH_FMIN: f64 = 150.0;
const PITCH_FMAX: f64 = 4000.0;
/// Peaks weaker than this fraction of the frame maximum are ignored.
const PEAK_THRESHOLD: f64 = 0.1;
/// Histogram resolution in fractions of a bin.
const RESOLUTION: f64 = 0.01;

pub fn estimate_tuning(spec: &Spectrogram, sample_rate: u32, n_fft: usize, bins_per_octave: usize) -> f64 {
    let pitches = dominant_pitches(spec, sample_rate, n_fft);
    pitch_tuning(&pitches, bins_per_octave)
}

/// Interpolated peak frequencies whose magnitude is at least the median peak magnitude.
fn dominant_pitches(spec: &Spectrogram, sample_rate: u32, n_fft: usize) -> Vec<f64> {
    let freqs = fft_frequencies(sample_rate, n_fft);
    let fmax = PITCH_FMAX.min(sample_rate as f64 / 2.0);
    let bin_hz = sample_rate as f64 / n_fft as f64;

    let mut peaks: Vec<(f64, f64)> = Vec::new();
    for frame in &spec.frames {
        let n = frame.len();
        if n < 3 {
            continue;
        }

        let frame_max = frame.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let floor = PEAK_THRESHOLD * frame_max;
        let gated = |i: usize| if frame[i] > floor { frame[i] } else { 0.0 };

        for i in 0..n {
            if freqs[i] < PITCH_FMIN || freqs[i] >= fmax {
                continue;
            }

            let prev = gated(i.saturating_sub(1));
            let next = gated((i + 1).min(n - 1));
            let here = gated(i);
            if !(here > prev && here >= next) {
                continue;
            }

            let (shift, slope) = if i == 0 || i == n - 1 {
                let slope = if i == 0 { frame[1] - frame[0] } else { frame[n - 1] - frame[n - 2] };
                (0.0, slope)
            } else {
                let a = frame[i + 1] + frame[i - 1] - 2.0 * frame[i];
                let b = (frame[i + 1] - frame[i - 1]) / 2.0;
                let shift = if b.abs() >= a.abs() { 0.0 } else { -b / a };
                (shift, b)
            };

            let pitch = (i as f64 + shift) * bin_hz;
            let magnitude = frame[i] + 0.5 * slope * shift;
            if pitch > 0.0 {
                peaks.push((pitch, magnitude));
            }
        }
    }

    if peaks.is_empty() {
        return Vec::new();
    }

    let mut magnitudes: Vec<f64> = peaks.iter().map(|&(_, m)| m).collect();
    let threshold = median(&mut magnitudes);

    peaks
        .into_iter()
        .filter(|&(_, m)| m >= threshold)
        .map(|(p, _)| p)
        .collect()
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Most common deviation of `frequencies` from the nearest chroma bin.
pub fn pitch_tuning(frequencies: &[f64], bins_per_octave: usize) -> f64 {
    if frequencies.is_empty() {
        return 0.0;
    }

    let n_bins = (1.0 / RESOLUTION).ceil() as usize;
    let mut counts = vec![0usize; n_bins];

    for &f in frequencies {
        let mut residual = (bins_per_octave as f64 * hz_to_octs(f, 0.0, bins_per_octave)).rem_euclid(1.0);
        if residual >= 0.5 {
            residual -= 1.0;
        }

        let index = (((residual + 0.5) * n_bins as f64).floor() as usize).min(n_bins - 1);
        counts[index] += 1;
    }

    // First bin wins ties.
    let mut best = 0;
    for (i, &count) in counts.iter().enumerate() {
        if count > counts[best] {
            best = i;
        }
    }

    -0.5 + best as f64 * RESOLUTION
}

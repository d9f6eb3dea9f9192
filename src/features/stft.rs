//! Short-time Fourier transform of one analysis window.
//!
//! Frames are centred: the signal is zero-padded by `n_fft / 2` on both sides,
//! so a window of `N` samples yields `1 + N / hop` frames. Each frame is
//! weighted with a periodic Hann window before the FFT.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Magnitude spectrogram, one `n_fft / 2 + 1` row per frame.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    pub frames: Vec<Vec<f64>>,
    pub n_bins: usize,
}

impl Spectrogram {
    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }
}

/// Periodic Hann window (`N` in the denominator), as used for spectral analysis.
pub fn hann_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|n| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * n as f64 / size as f64).cos())
        .collect()
}

/// Number of frames for `len` samples once padded by `pad` on both sides.
pub fn frame_count(len: usize, pad: usize, frame: usize, hop: usize) -> usize {
    let padded = len + 2 * pad;
    if padded < frame {
        0
    } else {
        1 + (padded - frame) / hop
    }
}

pub struct Stft {
    n_fft: usize,
    hop_length: usize,
    window: Vec<f64>,
    fft: Arc<dyn Fft<f64>>,
}

impl Stft {
    pub fn new(n_fft: usize, hop_length: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n_fft);

        Self {
            n_fft,
            hop_length,
            window: hann_window(n_fft),
            fft,
        }
    }

    pub fn n_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    pub fn magnitude(&self, signal: &[f64]) -> Spectrogram {
        let pad = self.n_fft / 2;
        let mut padded = vec![0.0; signal.len() + 2 * pad];
        padded[pad..pad + signal.len()].copy_from_slice(signal);

        let n_frames = frame_count(signal.len(), pad, self.n_fft, self.hop_length);
        let n_bins = self.n_bins();

        let mut buffer = vec![Complex::new(0.0, 0.0); self.n_fft];
        let mut scratch = vec![Complex::new(0.0, 0.0); self.fft.get_inplace_scratch_len()];
        let mut frames = Vec::with_capacity(n_frames);

        for t in 0..n_frames {
            let start = t * self.hop_length;
            let frame = &padded[start..start + self.n_fft];
            for ((slot, &x), &w) in buffer.iter_mut().zip(frame).zip(&self.window) {
                *slot = Complex::new(x * w, 0.0);
            }

            self.fft.process_with_scratch(&mut buffer, &mut scratch);
            frames.push(buffer[..n_bins].iter().map(|c| c.norm()).collect());
        }

        Spectrogram { frames, n_bins }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_second_window_has_63_frames() {
        let stft = Stft::new(2048, 512);
        let spec = stft.magnitude(&vec![0.0; 32000]);
        assert_eq!(spec.n_frames(), 63);
        assert_eq!(spec.n_bins, 1025);
    }

    #[test]
    fn test_sine_peaks_at_its_bin() {
        let sr = 16000.0;
        // Exactly on bin 64.
        let freq = 64.0 * sr / 2048.0;
        let signal: Vec<f64> = (0..8192)
            .map(|n| (2.0 * std::f64::consts::PI * freq * n as f64 / sr).sin())
            .collect();

        let spec = Stft::new(2048, 512).magnitude(&signal);
        let middle = &spec.frames[spec.n_frames() / 2];
        let peak = middle
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 64);
    }

    #[test]
    fn test_hann_window_is_periodic() {
        let window = hann_window(8);
        assert_eq!(window[0], 0.0);
        assert!((window[4] - 1.0).abs() < 1e-12);
        assert!((window[2] - window[6]).abs() < 1e-12);
    }
}

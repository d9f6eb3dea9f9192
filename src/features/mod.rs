//! # Feature Extraction
//!
//! Reduces one analysis window to a fixed-length descriptor vector, in this order:
//!
//! | Range               | Descriptor                              |
//! |---------------------|-----------------------------------------|
//! | `[0]`               | mean zero-crossing rate                 |
//! | `[1 ..= n_chroma]`  | mean chroma (peak-normalised per frame) |
//! | `[n_chroma + 1]`    | mean RMS energy                         |
//! | rest (`n_mels`)     | mean mel power spectrogram              |
//!
//! With the default configuration that is 1 + 12 + 1 + 128 = 142 values. The
//! order is part of the contract with the fitted scaler and classifier.
//!
//! Samples are widened from `i32` to float without rescaling; the scaler was
//! fitted on the same unnormalised amplitudes.

pub mod filters;
pub mod frames;
pub mod stft;
pub mod tuning;

use crate::audio::decoder::Sample;
use crate::config::FeatureConfig;
use crate::error::StreamError;
use filters::FilterBank;
use stft::{Spectrogram, Stft};
use tracing::debug;

/// Fixed-order descriptor of one window.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Vec<f64>,
    n_chroma: usize,
}

impl FeatureVector {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn zero_crossing_rate(&self) -> f64 {
        self.values[0]
    }

    pub fn chroma(&self) -> &[f64] {
        &self.values[1..1 + self.n_chroma]
    }

    pub fn rms(&self) -> f64 {
        self.values[1 + self.n_chroma]
    }

    pub fn mel(&self) -> &[f64] {
        &self.values[2 + self.n_chroma..]
    }
}

/// Stateless between windows: filter banks and the FFT plan are built once.
pub struct FeatureExtractor {
    config: FeatureConfig,
    sample_rate: u32,
    stft: Stft,
    mel_bank: FilterBank,
    /// Present when the chroma tuning is fixed by configuration
    chroma_bank: Option<FilterBank>,
}

impl FeatureExtractor {
    pub fn new(config: &FeatureConfig, sample_rate: u32) -> Self {
        let fmax = config.fmax.unwrap_or(sample_rate as f64 / 2.0);
        let mel_bank = filters::mel_filter_bank(sample_rate, config.n_fft, config.n_mels, config.fmin, fmax);
        let chroma_bank = config
            .chroma_tuning
            .map(|tuning| filters::chroma_filter_bank(sample_rate, config.n_fft, config.n_chroma, tuning));

        Self {
            config: config.clone(),
            sample_rate,
            stft: Stft::new(config.n_fft, config.hop_length),
            mel_bank,
            chroma_bank,
        }
    }

    /// Length of every vector this extractor produces.
    pub fn feature_len(&self) -> usize {
        self.config.feature_len()
    }

    pub fn extract(&self, window: &[Sample]) -> Result<FeatureVector, StreamError> {
        if window.is_empty() {
            return Err(StreamError::Shape {
                context: "analysis window",
                expected: self.config.n_fft,
                actual: 0,
            });
        }

        let signal: Vec<f64> = window.iter().map(|&s| s as f32 as f64).collect();
        let frame_length = self.config.frame_length;
        let hop = self.config.hop_length;

        let zcr = mean(&frames::zero_crossing_rate(&signal, frame_length, hop));
        let rms = mean(&frames::rms(&signal, frame_length, hop));

        let spectrogram = self.stft.magnitude(&signal);
        let chroma = self.chroma(&spectrogram);
        let mel = self.mel(&spectrogram);

        let mut values = Vec::with_capacity(self.feature_len());
        values.push(zcr);
        values.extend(chroma);
        values.push(rms);
        values.extend(mel);

        if values.len() != self.feature_len() {
            return Err(StreamError::Shape {
                context: "feature vector",
                expected: self.feature_len(),
                actual: values.len(),
            });
        }

        debug!(
            samples = window.len(),
            frames = spectrogram.n_frames(),
            zcr,
            rms,
            "Extracted window features"
        );

        Ok(FeatureVector {
            values,
            n_chroma: self.config.n_chroma,
        })
    }

    fn chroma(&self, spectrogram: &Spectrogram) -> Vec<f64> {
        let estimated;
        let bank = match &self.chroma_bank {
            Some(bank) => bank,
            None => {
                let tuning = tuning::estimate_tuning(
                    spectrogram,
                    self.sample_rate,
                    self.config.n_fft,
                    self.config.n_chroma,
                );
                estimated = filters::chroma_filter_bank(
                    self.sample_rate,
                    self.config.n_fft,
                    self.config.n_chroma,
                    tuning,
                );
                &estimated
            }
        };

        let per_frame: Vec<Vec<f64>> = spectrogram
            .frames
            .iter()
            .map(|frame| {
                let mut raw: Vec<f64> = bank.iter().map(|row| dot(row, frame)).collect();
                // Silent frames stay all-zero instead of dividing by zero.
                let peak = raw.iter().fold(0.0f64, |acc, &v| acc.max(v.abs()));
                if peak >= f64::MIN_POSITIVE {
                    raw.iter_mut().for_each(|v| *v /= peak);
                }
                raw
            })
            .collect();

        mean_rows(&per_frame, self.config.n_chroma)
    }

    fn mel(&self, spectrogram: &Spectrogram) -> Vec<f64> {
        let per_frame: Vec<Vec<f64>> = spectrogram
            .frames
            .iter()
            .map(|frame| {
                let power: Vec<f64> = frame.iter().map(|m| m * m).collect();
                self.mel_bank.iter().map(|row| dot(row, &power)).collect()
            })
            .collect();

        mean_rows(&per_frame, self.config.n_mels)
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Column means of a frames × bands matrix.
fn mean_rows(rows: &[Vec<f64>], width: usize) -> Vec<f64> {
    let mut sums = vec![0.0; width];
    for row in rows {
        for (sum, &v) in sums.iter_mut().zip(row) {
            *sum += v;
        }
    }

    if !rows.is_empty() {
        let n = rows.len() as f64;
        sums.iter_mut().for_each(|s| *s /= n);
    }
    sums
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn extractor() -> FeatureExtractor {
        let config = AppConfig::default();
        FeatureExtractor::new(&config.features, config.audio.sample_rate)
    }

    fn tone(freq: f64, amplitude: f64, len: usize) -> Vec<Sample> {
        (0..len)
            .map(|n| (amplitude * (2.0 * std::f64::consts::PI * freq * n as f64 / 16000.0).sin()) as Sample)
            .collect()
    }

    #[test]
    fn test_silent_window_yields_142_zero_descriptors() {
        let features = extractor().extract(&vec![0; 32000]).unwrap();
        assert_eq!(features.len(), 142);
        assert_eq!(features.zero_crossing_rate(), 0.0);
        assert_eq!(features.rms(), 0.0);
        assert!(features.as_slice().iter().all(|v| v.is_finite()));
        assert!(features.chroma().iter().all(|&c| c == 0.0));
        assert!(features.mel().iter().all(|&m| m == 0.0));
    }

    #[test]
    fn test_layout_accessors() {
        let features = extractor().extract(&tone(440.0, 1.0e6, 32000)).unwrap();
        assert_eq!(features.chroma().len(), 12);
        assert_eq!(features.mel().len(), 128);
        assert!(features.rms() > 0.0);
        assert!(features.zero_crossing_rate() > 0.0);
    }

    #[test]
    fn test_a440_dominates_chroma() {
        let features = extractor().extract(&tone(440.0, 1.0e6, 32000)).unwrap();
        let chroma = features.chroma();
        let strongest = (0..12)
            .max_by(|&a, &b| chroma[a].partial_cmp(&chroma[b]).unwrap())
            .unwrap();
        assert_eq!(strongest, 9);
        // Peak-normalised per frame, so the mean of the top class is close to 1.
        assert!(chroma[9] > 0.9 && chroma[9] <= 1.0 + 1e-9);
    }

    #[test]
    fn test_rms_of_sine_tracks_amplitude() {
        let amplitude = 1.0e6;
        let features = extractor().extract(&tone(1000.0, amplitude, 32000)).unwrap();
        let expected = amplitude / 2f64.sqrt();
        // Edge frames include zero padding, so the mean sits a little below.
        assert!(features.rms() < expected);
        assert!(features.rms() > 0.9 * expected);
    }

    #[test]
    fn test_higher_pitch_crosses_more_often() {
        let low = extractor().extract(&tone(200.0, 1.0e6, 32000)).unwrap();
        let high = extractor().extract(&tone(2000.0, 1.0e6, 32000)).unwrap();
        assert!(high.zero_crossing_rate() > low.zero_crossing_rate());
    }

    #[test]
    fn test_fixed_tuning_matches_shape() {
        let mut config = AppConfig::default();
        config.features.chroma_tuning = Some(0.0);
        let extractor = FeatureExtractor::new(&config.features, config.audio.sample_rate);
        let features = extractor.extract(&tone(440.0, 1.0e6, 32000)).unwrap();
        assert_eq!(features.len(), 142);
    }

    #[test]
    fn test_empty_window_is_a_shape_error() {
        let err = extractor().extract(&[]).unwrap_err();
        assert_eq!(err.code(), "shape_error");
    }
}

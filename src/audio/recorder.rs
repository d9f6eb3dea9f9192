//! # Session Recording
//!
//! Captures the decoded stream of one session into a WAV file so windows can be
//! replayed and relabelled later for retraining.
//!
//! Samples are stored as 32-bit IEEE float, which is exactly the signal the
//! feature extractor sees (integer → float widening, no rescaling).
//!
//! ## Precision:
//! `f32` holds 24 bits of mantissa, so any sample with `|x| > 2^24` loses its
//! low bits. I2S microphones that left-align 24-bit data in an `i32` hit this on
//! every non-trivial sample. The file is therefore NOT a bit-exact capture of
//! the wire stream; it reproduces features, not the raw PCM. Retraining on raw
//! PCM needs a capture taken before decoding.

use crate::audio::decoder::Sample;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct WavRecorder {
    path: PathBuf,
    sample_rate: u32,
    max_samples: usize,
    samples: Vec<f32>,
    truncated: bool,
}

impl WavRecorder {
    /// Prepare a recording at `<directory>/session-<session_id>.wav`.
    ///
    /// The directory is created eagerly so a bad path fails at session start
    /// rather than when the file is finalised.
    pub fn create(
        directory: &Path,
        session_id: &str,
        sample_rate: u32,
        max_seconds: u32,
    ) -> Result<Self> {
        fs::create_dir_all(directory)
            .with_context(|| format!("Failed to create recording directory {:?}", directory))?;

        let path = directory.join(format!("session-{}.wav", session_id));
        let max_samples = sample_rate as usize * max_seconds as usize;

        Ok(Self {
            path,
            sample_rate,
            max_samples,
            samples: Vec::with_capacity(sample_rate as usize),
            truncated: false,
        })
    }

    pub fn append(&mut self, samples: &[Sample]) {
        let room = self.max_samples.saturating_sub(self.samples.len());
        if samples.len() > room && !self.truncated {
            warn!(
                path = ?self.path,
                max_samples = self.max_samples,
                "Recording limit reached, further audio is not recorded"
            );
            self.truncated = true;
        }

        self.samples
            .extend(samples.iter().take(room).map(|&sample| sample as f32));
    }

    pub fn recorded_samples(&self) -> usize {
        self.samples.len()
    }

    /// Write the WAV file and return its path.
    pub fn finish(self) -> Result<PathBuf> {
        let seconds = self.recorded_samples() as f64 / self.sample_rate as f64;
        let header = wav::Header::new(wav::WAV_FORMAT_IEEE_FLOAT, 1, self.sample_rate, 32);
        let track = wav::BitDepth::ThirtyTwoFloat(self.samples);

        let mut file = File::create(&self.path)
            .with_context(|| format!("Failed to create recording {:?}", self.path))?;
        wav::write(header, &track, &mut file)
            .with_context(|| format!("Failed to write recording {:?}", self.path))?;

        info!(
            path = ?self.path,
            seconds,
            "Session recording saved"
        );

        Ok(self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("voice-emotion-rec-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_recording_round_trips_through_wav() {
        let dir = temp_dir();
        let mut recorder = WavRecorder::create(&dir, "abc", 16000, 10).unwrap();
        recorder.append(&[0, 1000, -1000, 123_456]);

        let path = recorder.finish().unwrap();
        let mut file = File::open(&path).unwrap();
        let (header, data) = wav::read(&mut file).unwrap();

        assert_eq!(header.sampling_rate, 16000);
        assert_eq!(header.channel_count, 1);
        match data {
            wav::BitDepth::ThirtyTwoFloat(samples) => {
                assert_eq!(samples, vec![0.0, 1000.0, -1000.0, 123_456.0]);
            }
            _ => panic!("Expected 32-bit float samples"),
        }

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_recording_stops_at_limit() {
        let dir = temp_dir();
        let mut recorder = WavRecorder::create(&dir, "limit", 4, 1).unwrap();
        recorder.append(&[1, 2, 3]);
        recorder.append(&[4, 5, 6]);
        assert_eq!(recorder.recorded_samples(), 4);

        fs::remove_dir_all(dir).ok();
    }
}

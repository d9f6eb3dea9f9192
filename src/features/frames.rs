//! Time-domain frame descriptors: zero-crossing rate and RMS energy.

use super::stft::frame_count;

/// Values this close to zero count as zero when looking for sign changes.
const ZERO_THRESHOLD: f64 = 1e-10;

/// Per-frame zero-crossing rate with centred frames.
///
/// The signal is edge-padded (first/last sample repeated) by half a frame.
/// A crossing is any change of sign bit between consecutive samples, after
/// near-zero values have been clamped to `+0`.
pub fn zero_crossing_rate(signal: &[f64], frame_length: usize, hop_length: usize) -> Vec<f64> {
    let (Some(&first), Some(&last)) = (signal.first(), signal.last()) else {
        return Vec::new();
    };

    let pad = frame_length / 2;
    let clamp = |x: f64| if x.abs() <= ZERO_THRESHOLD { 0.0 } else { x };

    let mut padded = Vec::with_capacity(signal.len() + 2 * pad);
    padded.extend(std::iter::repeat(clamp(first)).take(pad));
    padded.extend(signal.iter().map(|&x| clamp(x)));
    padded.extend(std::iter::repeat(clamp(last)).take(pad));

    let n_frames = frame_count(signal.len(), pad, frame_length, hop_length);
    (0..n_frames)
        .map(|t| {
            let frame = &padded[t * hop_length..t * hop_length + frame_length];
            let crossings = frame
                .windows(2)
                .filter(|pair| pair[0].is_sign_negative() != pair[1].is_sign_negative())
                .count();
            crossings as f64 / frame_length as f64
        })
        .collect()
}

/// Per-frame root-mean-square energy with centred, zero-padded frames.
pub fn rms(signal: &[f64], frame_length: usize, hop_length: usize) -> Vec<f64> {
    let pad = frame_length / 2;
    let mut padded = vec![0.0; signal.len() + 2 * pad];
    padded[pad..pad + signal.len()].copy_from_slice(signal);

    let n_frames = frame_count(signal.len(), pad, frame_length, hop_length);
    (0..n_frames)
        .map(|t| {
            let frame = &padded[t * hop_length..t * hop_length + frame_length];
            let power = frame.iter().map(|x| x * x).sum::<f64>() / frame_length as f64;
            power.sqrt()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_has_no_crossings_or_energy() {
        let silence = vec![0.0; 4000];
        assert!(zero_crossing_rate(&silence, 2048, 512).iter().all(|&z| z == 0.0));
        assert!(rms(&silence, 2048, 512).iter().all(|&r| r == 0.0));
    }

    #[test]
    fn test_alternating_signal_crosses_every_sample() {
        let signal: Vec<f64> = (0..8192).map(|n| if n % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let zcr = zero_crossing_rate(&signal, 2048, 512);
        // An interior frame has 2047 sign changes out of 2048 samples.
        let interior = zcr[zcr.len() / 2];
        assert!((interior - 2047.0 / 2048.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_signal_rms() {
        let signal = vec![3.0; 8192];
        let values = rms(&signal, 2048, 512);
        assert_eq!(values.len(), 17);
        assert!((values[values.len() / 2] - 3.0).abs() < 1e-12);
        // Edge frames are half zero padding.
        assert!((values[0] - (4.5f64).sqrt()).abs() < 1e-12);
    }
}

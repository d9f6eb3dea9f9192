//! Mel and chroma filter banks.
//!
//! Both banks map the `n_fft / 2 + 1` bins of a magnitude/power spectrum onto
//! a small number of perceptual bands. They are built with the same formulas
//! the classifier's training features used (Slaney mel scale with area
//! normalisation; Gaussian chroma bumps weighted around octave 5).

/// Linear region slope of the Slaney mel scale (Hz per mel).
const F_SP: f64 = 200.0 / 3.0;
/// Start of the logarithmic region.
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

/// A `bands × bins` weight matrix, row-major.
pub type FilterBank = Vec<Vec<f64>>;

pub fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

pub fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// Octave number of `hz` relative to C0 for the given tuning (in fractions of a bin).
pub fn hz_to_octs(hz: f64, tuning: f64, bins_per_octave: usize) -> f64 {
    let a440 = 440.0 * 2f64.powf(tuning / bins_per_octave as f64);
    (hz / (a440 / 16.0)).log2()
}

/// Center frequency of each STFT bin.
pub fn fft_frequencies(sample_rate: u32, n_fft: usize) -> Vec<f64> {
    (0..=n_fft / 2)
        .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
        .collect()
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![start];
    }
    let step = (end - start) / (n - 1) as f64;
    (0..n).map(|i| start + step * i as f64).collect()
}

/// Triangular mel filters, each scaled to unit area (Slaney normalisation).
pub fn mel_filter_bank(sample_rate: u32, n_fft: usize, n_mels: usize, fmin: f64, fmax: f64) -> FilterBank {
    let fft_freqs = fft_frequencies(sample_rate, n_fft);

    // n_mels + 2 edges, evenly spaced on the mel scale.
    let mel_edges: Vec<f64> = linspace(hz_to_mel(fmin), hz_to_mel(fmax), n_mels + 2)
        .into_iter()
        .map(mel_to_hz)
        .collect();

    let mut bank = Vec::with_capacity(n_mels);
    for m in 0..n_mels {
        let (left, center, right) = (mel_edges[m], mel_edges[m + 1], mel_edges[m + 2]);
        let enorm = 2.0 / (right - left);

        let row = fft_freqs
            .iter()
            .map(|&f| {
                let lower = (f - left) / (center - left);
                let upper = (right - f) / (right - center);
                lower.min(upper).max(0.0) * enorm
            })
            .collect();
        bank.push(row);
    }

    bank
}

/// Chroma filters folding every STFT bin onto `n_chroma` pitch classes, starting at C.
pub fn chroma_filter_bank(sample_rate: u32, n_fft: usize, n_chroma: usize, tuning: f64) -> FilterBank {
    const CENTER_OCTAVE: f64 = 5.0;
    const OCTAVE_WIDTH: f64 = 2.0;

    let n_chroma_f = n_chroma as f64;

    // Fractional chroma bin of every FFT bin except DC; DC gets a bin far below.
    let mut frqbins = Vec::with_capacity(n_fft);
    for k in 1..n_fft {
        let hz = k as f64 * sample_rate as f64 / n_fft as f64;
        frqbins.push(n_chroma_f * hz_to_octs(hz, tuning, n_chroma));
    }
    frqbins.insert(0, frqbins[0] - 1.5 * n_chroma_f);

    let mut binwidth: Vec<f64> = frqbins.windows(2).map(|w| (w[1] - w[0]).max(1.0)).collect();
    binwidth.push(1.0);

    let half_chroma = (n_chroma_f / 2.0).round_ties_even();
    let mut weights: FilterBank = (0..n_chroma)
        .map(|c| {
            frqbins
                .iter()
                .zip(&binwidth)
                .map(|(&frq, &width)| {
                    let d = (frq - c as f64 + half_chroma + 10.0 * n_chroma_f).rem_euclid(n_chroma_f)
                        - half_chroma;
                    (-0.5 * (2.0 * d / width).powi(2)).exp()
                })
                .collect()
        })
        .collect();

    // Unit L2 norm per FFT bin, across chroma.
    for k in 0..n_fft {
        let norm = weights.iter().map(|row| row[k] * row[k]).sum::<f64>().sqrt();
        if norm >= f64::MIN_POSITIVE {
            for row in weights.iter_mut() {
                row[k] /= norm;
            }
        }
    }

    // Emphasise the octaves around the center of the speech/music range.
    for (k, &frq) in frqbins.iter().enumerate() {
        let octave_weight = (-0.5 * ((frq / n_chroma_f - CENTER_OCTAVE) / OCTAVE_WIDTH).powi(2)).exp();
        for row in weights.iter_mut() {
            row[k] *= octave_weight;
        }
    }

    // Rows are A-based until rolled to start at C.
    let shift = 3 * (n_chroma / 12);
    let n_bins = n_fft / 2 + 1;
    (0..n_chroma)
        .map(|c| weights[(c + shift) % n_chroma][..n_bins].to_vec())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mel_scale_round_trip() {
        for hz in [0.0, 440.0, 999.0, 1000.0, 4000.0, 8000.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
        // Linear below 1 kHz.
        assert!((hz_to_mel(200.0) - 3.0).abs() < 1e-12);
        assert!((hz_to_mel(1000.0) - 15.0).abs() < 1e-12);
    }

    #[test]
    fn test_mel_bank_shape_and_coverage() {
        let bank = mel_filter_bank(16000, 2048, 128, 0.0, 8000.0);
        assert_eq!(bank.len(), 128);
        assert!(bank.iter().all(|row| row.len() == 1025));
        assert!(bank.iter().flatten().all(|&w| w >= 0.0));

        // Every band except possibly the narrowest low ones touches some bin.
        let empty = bank.iter().filter(|row| row.iter().all(|&w| w == 0.0)).count();
        assert!(empty < 10);
    }

    #[test]
    fn test_chroma_bank_shape() {
        let bank = chroma_filter_bank(16000, 2048, 12, 0.0);
        assert_eq!(bank.len(), 12);
        assert!(bank.iter().all(|row| row.len() == 1025));
    }

    #[test]
    fn test_chroma_bank_maps_a440_to_a() {
        let bank = chroma_filter_bank(16000, 2048, 12, 0.0);
        // 440 Hz sits at bin 56.32; take the nearest bin.
        let bin = (440.0f64 * 2048.0 / 16000.0).round() as usize;
        let strongest = (0..12)
            .max_by(|&a, &b| bank[a][bin].partial_cmp(&bank[b][bin]).unwrap())
            .unwrap();
        // C, C#, D, D#, E, F, F#, G, G#, A
        assert_eq!(strongest, 9);
    }
}

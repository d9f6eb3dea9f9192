//! # Window Accumulation
//!
//! [`WindowBuffer`] collects decoded samples until a full analysis window of
//! `W = sample_rate × predict_interval_seconds` samples is available. Windows
//! never overlap: draining hands out everything accumulated so far and starts
//! the next window from empty.
//!
//! The buffer is owned by exactly one session task, so no locking is involved.
//! A drained window is moved out, never shared with the buffer.
//!
//! [`WaveformTail`] keeps the most recent samples for the live waveform view,
//! independently of window boundaries.
//!
//! ## Rust Concepts:
//! - **std::mem::replace**: swaps a fresh `Vec` in and returns the full one by value,
//!   so the window leaves the buffer without a copy
//! - **VecDeque**: ring buffer; dropping the oldest samples is `O(1)` per sample
//! - **IntoIterator bound**: `push` takes a `Vec` or the decoder's lazy `Samples` iterator

use crate::audio::decoder::Sample;
use std::collections::VecDeque;

pub struct WindowBuffer {
    samples: Vec<Sample>,
    window_size: usize,
}

impl WindowBuffer {
    /// Create a buffer for windows of `window_size` samples.
    ///
    /// ## Example:
    /// 2 seconds at 16kHz: 16000 × 2 = 32,000 samples
    pub fn new(window_size: usize) -> Self {
        Self {
            samples: Vec::with_capacity(window_size),
            window_size,
        }
    }

    /// Append samples to the current window.
    ///
    /// Pushing past `W` is allowed; the window just grows until the next drain.
    pub fn push<I>(&mut self, samples: I)
    where
        I: IntoIterator<Item = Sample>,
    {
        self.samples.extend(samples);
    }

    /// True once at least `W` samples have accumulated.
    pub fn is_ready(&self) -> bool {
        self.samples.len() >= self.window_size
    }

    /// Take every accumulated sample and reset to empty.
    ///
    /// Called after observing `is_ready()`, this returns at least `W` samples.
    /// Called on an empty buffer it returns an empty window, which callers must
    /// not treat as ready.
    pub fn drain(&mut self) -> Vec<Sample> {
        std::mem::replace(&mut self.samples, Vec::with_capacity(self.window_size))
    }

    /// Drop a partial window (session stopped mid-accumulation).
    ///
    /// Returns how many samples were discarded.
    pub fn discard(&mut self) -> usize {
        let discarded = self.samples.len();
        self.samples.clear();
        discarded
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }
}

/// Bounded history of the latest samples, for waveform rendering.
pub struct WaveformTail {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl WaveformTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn extend(&mut self, samples: &[Sample]) {
        if self.capacity == 0 {
            return;
        }

        // Only the last `capacity` samples of a large read can survive.
        let start = samples.len().saturating_sub(self.capacity);
        for &sample in &samples[start..] {
            if self.samples.len() == self.capacity {
                self.samples.pop_front();
            }
            self.samples.push_back(sample);
        }
    }

    /// Oldest-first copy of the retained samples.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_exactly_at_window_size() {
        let mut buffer = WindowBuffer::new(32000);
        buffer.push(std::iter::repeat(1).take(31999));
        assert!(!buffer.is_ready());

        buffer.push([1]);
        assert!(buffer.is_ready());
    }

    #[test]
    fn test_drain_resets_to_empty() {
        let mut buffer = WindowBuffer::new(4);
        buffer.push([1, 2, 3, 4, 5]);
        assert!(buffer.is_ready());

        let window = buffer.drain();
        assert_eq!(window, vec![1, 2, 3, 4, 5]);
        assert_eq!(buffer.len(), 0);
        assert!(!buffer.is_ready());
    }

    #[test]
    fn test_back_to_back_drain_is_not_ready() {
        let mut buffer = WindowBuffer::new(4);
        buffer.push([1, 2, 3, 4]);
        assert_eq!(buffer.drain().len(), 4);

        assert!(!buffer.is_ready());
        let second = buffer.drain();
        assert!(second.len() < buffer.window_size());
        assert!(second.is_empty());
    }

    #[test]
    fn test_no_sample_lost_or_duplicated_across_windows() {
        let mut buffer = WindowBuffer::new(100);
        let mut drained = Vec::new();
        let mut next = 0;

        // Irregular read sizes, like a real socket.
        for size in [37usize, 64, 1, 250, 13, 99, 100, 7].iter().cycle().take(40) {
            let chunk: Vec<Sample> = (next..next + *size as i32).collect();
            next += *size as i32;
            buffer.push(chunk);
            if buffer.is_ready() {
                let window = buffer.drain();
                assert!(window.len() >= 100);
                drained.extend(window);
            }
        }

        let remainder = buffer.discard();
        assert_eq!(drained.len() + remainder, next as usize);
        let expected: Vec<Sample> = (0..drained.len() as i32).collect();
        assert_eq!(drained, expected);
    }

    #[test]
    fn test_waveform_tail_keeps_latest_samples() {
        let mut tail = WaveformTail::new(4);
        tail.extend(&[1, 2, 3]);
        tail.extend(&[4, 5]);
        assert_eq!(tail.snapshot(), vec![2, 3, 4, 5]);

        tail.extend(&[10, 11, 12, 13, 14, 15]);
        assert_eq!(tail.snapshot(), vec![12, 13, 14, 15]);
    }
}

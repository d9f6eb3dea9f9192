//! # Sample Decoding
//!
//! Turns raw socket reads into PCM samples. The device sends consecutive
//! little-endian 32-bit signed integers with no framing, so decoding is a plain
//! reinterpretation of the byte stream.
//!
//! Reads are not guaranteed to end on a sample boundary. [`SampleDecoder`]
//! handles the trailing bytes according to the configured [`RemainderPolicy`].
//!
//! ## Rust Concepts:
//! - **Cursor + ReadBytesExt**: `byteorder` reads typed integers from any `Read`
//! - **Lifetimes**: [`Samples<'a>`] borrows the chunk, so decoding allocates nothing
//!   until the caller collects
//! - **ExactSizeIterator**: the sample count is known up front, so `collect` reserves once

use crate::config::RemainderPolicy;
use crate::error::StreamError;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// One mono PCM sample as sent by the device.
pub type Sample = i32;

/// Bytes per sample on the wire.
pub const SAMPLE_WIDTH: usize = 4;

/// Lazy iterator over the samples of a sample-aligned chunk.
pub struct Samples<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl Iterator for Samples<'_> {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        self.cursor.read_i32::<LittleEndian>().ok()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.cursor.get_ref().len() as u64 - self.cursor.position()) as usize;
        let count = remaining / SAMPLE_WIDTH;
        (count, Some(count))
    }
}

impl ExactSizeIterator for Samples<'_> {}

/// Decode a chunk that must contain whole samples only.
///
/// ## Returns:
/// - **Ok(Samples)**: lazy sequence of `chunk.len() / 4` samples
/// - **Err(StreamError::Decode)**: the chunk length is not a multiple of 4
pub fn decode_chunk(chunk: &[u8]) -> Result<Samples<'_>, StreamError> {
    if chunk.len() % SAMPLE_WIDTH != 0 {
        return Err(StreamError::Decode { len: chunk.len() });
    }

    Ok(Samples {
        cursor: Cursor::new(chunk),
    })
}

/// Result of feeding one read through the decoder.
#[derive(Debug, Default)]
pub struct Decoded {
    pub samples: Vec<Sample>,
    /// Bytes thrown away by the `Drop` policy
    pub dropped_bytes: usize,
    /// Set when the read was not sample-aligned (after any carried bytes)
    pub misaligned: Option<StreamError>,
}

/// Stateful decoder for one connection.
///
/// With `Carry`, up to three trailing bytes are kept and prepended to the next
/// read, so a sample split across two reads is reassembled. With `Drop`, the
/// trailing bytes of a misaligned read are discarded.
pub struct SampleDecoder {
    policy: RemainderPolicy,
    carry: Vec<u8>,
}

impl SampleDecoder {
    pub fn new(policy: RemainderPolicy) -> Self {
        Self {
            policy,
            carry: Vec::with_capacity(SAMPLE_WIDTH),
        }
    }

    /// Decode one raw read.
    pub fn decode(&mut self, chunk: &[u8]) -> Decoded {
        let joined;
        let bytes: &[u8] = if self.carry.is_empty() {
            chunk
        } else {
            let mut buf = std::mem::take(&mut self.carry);
            buf.extend_from_slice(chunk);
            joined = buf;
            &joined
        };

        let aligned_len = bytes.len() - bytes.len() % SAMPLE_WIDTH;
        let (aligned, rest) = bytes.split_at(aligned_len);

        let misaligned = match decode_chunk(bytes) {
            Ok(_) => None,
            Err(err) => Some(err),
        };

        let samples = match decode_chunk(aligned) {
            Ok(iter) => iter.collect(),
            Err(_) => Vec::new(),
        };

        let dropped_bytes = match self.policy {
            RemainderPolicy::Carry => {
                self.carry.extend_from_slice(rest);
                0
            }
            RemainderPolicy::Drop => rest.len(),
        };

        Decoded {
            samples,
            dropped_bytes,
            misaligned,
        }
    }

    /// Bytes currently held back waiting for the rest of their sample.
    pub fn pending_bytes(&self) -> usize {
        self.carry.len()
    }

    /// Forget any partial sample, e.g. when a connection ends.
    pub fn reset(&mut self) {
        self.carry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(samples: &[Sample]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_4096_bytes_yield_1024_samples() {
        let chunk = vec![0u8; 4096];
        let samples = decode_chunk(&chunk).unwrap();
        assert_eq!(samples.len(), 1024);
        assert_eq!(samples.count(), 1024);
    }

    #[test]
    fn test_little_endian_signed_values() {
        let chunk = encode(&[1, -1, i32::MAX, i32::MIN]);
        let samples: Vec<Sample> = decode_chunk(&chunk).unwrap().collect();
        assert_eq!(samples, vec![1, -1, i32::MAX, i32::MIN]);
    }

    #[test]
    fn test_misaligned_chunk_is_a_decode_error() {
        let err = decode_chunk(&[0u8; 4097]).err().unwrap();
        assert!(matches!(err, StreamError::Decode { len: 4097 }));
    }

    #[test]
    fn test_carry_reassembles_split_sample() {
        let bytes = encode(&[7, -300_000, 42]);
        let mut decoder = SampleDecoder::new(RemainderPolicy::Carry);

        let first = decoder.decode(&bytes[..6]);
        assert_eq!(first.samples, vec![7]);
        assert!(first.misaligned.is_some());
        assert_eq!(first.dropped_bytes, 0);
        assert_eq!(decoder.pending_bytes(), 2);

        let second = decoder.decode(&bytes[6..]);
        assert_eq!(second.samples, vec![-300_000, 42]);
        assert!(second.misaligned.is_none());
        assert_eq!(decoder.pending_bytes(), 0);
    }

    #[test]
    fn test_drop_discards_trailing_bytes() {
        let bytes = encode(&[5, 6, 7]);
        let mut decoder = SampleDecoder::new(RemainderPolicy::Drop);

        let decoded = decoder.decode(&bytes[..10]);
        assert_eq!(decoded.samples, vec![5, 6]);
        assert_eq!(decoded.dropped_bytes, 2);
        assert_eq!(decoder.pending_bytes(), 0);
    }
}

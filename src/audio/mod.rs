//! # Audio Ingest
//!
//! Everything between the recording device's socket and a complete analysis window.
//!
//! ## Key Components:
//! - **Decoder**: raw little-endian `i32` bytes → samples, with a remainder policy
//! - **Buffer**: non-overlapping window accumulation and the waveform tail
//! - **Session**: connection lifecycle and the per-tick ingest loop
//! - **Recorder**: optional WAV capture of each session
//!
//! ## Stream Format:
//! - **Sample Rate**: configured (16 kHz by default)
//! - **Bit Depth**: 32-bit signed PCM
//! - **Channels**: Mono (1 channel)
//! - **Framing**: none; end of stream is the peer closing the connection

pub mod buffer;
pub mod decoder;
pub mod recorder;
pub mod session;

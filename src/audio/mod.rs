//! # Audio Processing Module
//!
//! Turns transport payloads into recognizer-sized windows of samples.
//!
//! ## Key Components:
//! - **Frame Decoder**: raw little-endian PCM16 bytes → normalized `f32` samples
//! - **Audio Accumulator**: collects decoded chunks until enough audio is
//!   buffered to be worth a recognizer call
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 16kHz (16,000 Hz) by default
//! - **Bit Depth**: 16-bit PCM, little-endian, no container header
//! - **Channels**: Mono (1 channel)

pub mod buffer;
pub mod decoder;

pub use buffer::{AudioAccumulator, AudioChunk};
pub use decoder::{AudioFormat, FrameDecoder};

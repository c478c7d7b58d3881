//! # Audio Frame Decoder
//!
//! Converts binary audio frames into normalized samples. Frames are headerless
//! little-endian signed 16-bit PCM; the output is `f32` in `[-1.0, 1.0)`,
//! obtained by dividing every sample by 32768.
//!
//! Decoding is a pure transform: a rejected frame leaves nothing behind.

use crate::config::AudioConfig;
use crate::error::{StreamError, StreamResult};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// Bytes per PCM16 sample.
pub const SAMPLE_WIDTH_BYTES: usize = 2;

/// The only sample encoding frames may use.
pub const SUPPORTED_SUBTYPE: &str = "PCM_16";

/// Audio format, either the one the server expects or one claimed by a peer
/// in its START command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    #[serde(default = "default_subtype")]
    pub subtype: String,
}

fn default_subtype() -> String {
    SUPPORTED_SUBTYPE.to_string()
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16, subtype: impl Into<String>) -> Self {
        Self {
            sample_rate,
            channels,
            subtype: subtype.into(),
        }
    }

    pub fn from_config(config: &AudioConfig) -> Self {
        Self::new(config.sample_rate, config.channels, config.subtype.clone())
    }
}

/// Stateless decoder bound to the server's expected format.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    format: AudioFormat,
}

impl FrameDecoder {
    pub fn new(format: AudioFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// Check a format claimed by the peer against the one we decode.
    ///
    /// Subtype names are compared case-insensitively (`pcm_16` == `PCM_16`).
    pub fn check_format(&self, claimed: &AudioFormat) -> StreamResult<()> {
        if claimed.channels != self.format.channels {
            return Err(StreamError::Decode(format!(
                "unsupported channel count: expected {}, got {}",
                self.format.channels, claimed.channels
            )));
        }

        if claimed.sample_rate != self.format.sample_rate {
            return Err(StreamError::Decode(format!(
                "unsupported sample rate: expected {}, got {}",
                self.format.sample_rate, claimed.sample_rate
            )));
        }

        if !claimed.subtype.eq_ignore_ascii_case(&self.format.subtype) {
            return Err(StreamError::Decode(format!(
                "unsupported subtype: expected {}, got {}",
                self.format.subtype, claimed.subtype
            )));
        }

        Ok(())
    }

    /// Decode one binary frame.
    ///
    /// An empty frame decodes to no samples. A frame whose length is not a
    /// whole number of samples is rejected.
    pub fn decode(&self, payload: &[u8]) -> StreamResult<Vec<f32>> {
        if payload.len() % SAMPLE_WIDTH_BYTES != 0 {
            return Err(StreamError::Decode(format!(
                "payload of {} bytes is not a whole number of {}-byte samples",
                payload.len(),
                SAMPLE_WIDTH_BYTES
            )));
        }

        let mut pcm = vec![0i16; payload.len() / SAMPLE_WIDTH_BYTES];
        LittleEndian::read_i16_into(payload, &mut pcm);

        Ok(pcm.into_iter().map(pcm_to_float).collect())
    }

    /// Duration of `samples` at the decoder's sample rate.
    pub fn seconds(&self, samples: usize) -> f64 {
        samples as f64 / self.format.sample_rate as f64
    }
}

/// Scale a PCM16 sample into `[-1.0, 1.0)`.
pub fn pcm_to_float(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

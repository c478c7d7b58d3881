//! `StubRecognizer`: deterministic stand-in for a real incremental engine.
//!
//! Lets the whole streaming path (transport, buffering, protocol) run end to
//! end without a model. Every window handed to `process_iter` is committed as
//! one segment covering that window's place on the session timeline; windows
//! quieter than the silence floor commit nothing but still advance time.

use crate::protocol::RecognizedSegment;
use crate::transcription::engine::{OnlineRecognizer, RecognizerFactory};
use tracing::debug;

/// RMS below which a window counts as silence.
pub const SILENCE_RMS: f32 = 0.01;

pub struct StubRecognizer {
    sample_rate: u32,
    label: String,

    /// Samples already committed (or skipped as silence)
    committed_samples: usize,

    /// Inserted but not yet processed
    pending: Vec<f32>,
}

impl StubRecognizer {
    pub fn new(sample_rate: u32, label: impl Into<String>) -> Self {
        Self {
            sample_rate,
            label: label.into(),
            committed_samples: 0,
            pending: Vec::new(),
        }
    }

    fn commit_pending(&mut self) -> Option<RecognizedSegment> {
        if self.pending.is_empty() {
            return None;
        }

        let start = self.committed_samples as f64 / self.sample_rate as f64;
        self.committed_samples += self.pending.len();
        let end = self.committed_samples as f64 / self.sample_rate as f64;

        let level = rms(&self.pending);
        let samples = std::mem::take(&mut self.pending);

        if level < SILENCE_RMS {
            debug!(start, end, level, "StubRecognizer: silent window");
            return None;
        }

        Some(RecognizedSegment::new(
            start,
            end,
            format!("[{}: {} samples, rms {:.3}]", self.label, samples.len(), level),
        ))
    }
}

impl OnlineRecognizer for StubRecognizer {
    fn init(&mut self) {
        debug!("StubRecognizer::init");
        self.committed_samples = 0;
        self.pending.clear();
    }

    fn insert_audio_chunk(&mut self, samples: &[f32]) {
        self.pending.extend_from_slice(samples);
    }

    fn process_iter(&mut self) -> Option<RecognizedSegment> {
        self.commit_pending()
    }

    fn finish(&mut self) -> Option<RecognizedSegment> {
        self.commit_pending()
    }
}

/// Factory for [`StubRecognizer`].
pub struct StubRecognizerFactory {
    sample_rate: u32,
    label: String,
}

impl StubRecognizerFactory {
    pub fn new(sample_rate: u32, label: impl Into<String>) -> Self {
        Self {
            sample_rate,
            label: label.into(),
        }
    }
}

impl RecognizerFactory for StubRecognizerFactory {
    fn name(&self) -> &str {
        "stub"
    }

    fn create(&self) -> Box<dyn OnlineRecognizer> {
        Box::new(StubRecognizer::new(self.sample_rate, self.label.clone()))
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f32 = samples.iter().map(|s| s * s).sum();
    (energy / samples.len() as f32).sqrt()
}

//! # Audio Accumulator
//!
//! Smooths bursty frame arrival into recognizer-sized windows. Decoded chunks
//! are queued in arrival order; once the queued audio reaches the flush
//! threshold the session drains everything in one go and hands it to the
//! recognizer.
//!
//! ## Invariants:
//! - `running_samples` always equals the sum of the pending chunk lengths
//! - `drain()` concatenates in arrival order and leaves the buffer empty
//!
//! Nothing here is shared: each session owns its accumulator, so no locking.

/// One decoded frame plus its arrival sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub seq: u64,
    pub samples: Vec<f32>,
}

impl AudioChunk {
    pub fn new(seq: u64, samples: Vec<f32>) -> Self {
        Self { seq, samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Pending audio for one session.
#[derive(Debug)]
pub struct AudioAccumulator {
    pending: Vec<AudioChunk>,

    running_samples: usize,

    /// Samples needed before `ready_to_flush()` turns true
    threshold_samples: usize,

    sample_rate: u32,

    /// Sequence number handed to the next chunk from `push_samples`
    next_seq: u64,
}

impl AudioAccumulator {
    /// Create an accumulator that flushes once `min_chunk_seconds` of audio at
    /// `sample_rate` is pending.
    ///
    /// ## Calculation:
    /// threshold = ceil(min_chunk_seconds * sample_rate), at least one sample.
    /// For 1.0s at 16kHz that is 16,000 samples.
    pub fn new(min_chunk_seconds: f64, sample_rate: u32) -> Self {
        let threshold = (min_chunk_seconds * sample_rate as f64).ceil();
        let threshold_samples = if threshold.is_finite() && threshold >= 1.0 {
            threshold as usize
        } else {
            1
        };

        Self {
            pending: Vec::new(),
            running_samples: 0,
            threshold_samples,
            sample_rate,
            next_seq: 0,
        }
    }

    /// Queue a decoded chunk behind everything already pending.
    pub fn append(&mut self, chunk: AudioChunk) {
        self.next_seq = self.next_seq.max(chunk.seq.saturating_add(1));
        self.running_samples += chunk.len();
        self.pending.push(chunk);
    }

    /// Wrap freshly decoded samples in a chunk with the next sequence number
    /// and queue it. Returns the sequence number used.
    pub fn push_samples(&mut self, samples: Vec<f32>) -> u64 {
        let seq = self.next_seq;
        self.append(AudioChunk::new(seq, samples));
        seq
    }

    /// True once at least the threshold amount of audio is pending.
    pub fn ready_to_flush(&self) -> bool {
        self.running_samples >= self.threshold_samples
    }

    /// Concatenate all pending chunks in arrival order and reset to empty.
    pub fn drain(&mut self) -> Vec<f32> {
        let mut samples = Vec::with_capacity(self.running_samples);
        for chunk in self.pending.drain(..) {
            samples.extend(chunk.samples);
        }
        self.running_samples = 0;
        samples
    }

    /// Drop everything pending, e.g. when a session is restarted.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.running_samples = 0;
    }

    pub fn len(&self) -> usize {
        self.running_samples
    }

    pub fn is_empty(&self) -> bool {
        self.running_samples == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.pending.len()
    }

    pub fn threshold_samples(&self) -> usize {
        self.threshold_samples
    }

    /// Pending audio duration in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.running_samples as f64 / self.sample_rate as f64
    }
}

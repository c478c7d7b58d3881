//! # Recognizer Interface
//!
//! The incremental speech recognizer is an external component. The session
//! only talks to it through [`OnlineRecognizer`]: four calls, all blocking,
//! all on the session's own instance.
//!
//! ## Lifecycle per session:
//! 1. `init()` on START (also on a restart within the same connection)
//! 2. `insert_audio_chunk()` + `process_iter()` for every flushed window
//! 3. `finish()` on END, to flush whatever the recognizer still holds
//!
//! Instances are created by a [`RecognizerFactory`], one per connection, so
//! recognizers never need to be reentrant or shared between sessions.

use crate::protocol::RecognizedSegment;
use std::fmt;
use std::sync::Arc;

/// Stateful incremental recognizer owned by a single session.
pub trait OnlineRecognizer: Send {
    /// Reset all decoding state for a new utterance.
    fn init(&mut self);

    /// Feed normalized mono samples at the configured sample rate.
    fn insert_audio_chunk(&mut self, samples: &[f32]);

    /// Process what has been inserted so far. `None` when there is no new
    /// committed text.
    fn process_iter(&mut self) -> Option<RecognizedSegment>;

    /// Flush the remaining hypothesis at the end of the stream.
    fn finish(&mut self) -> Option<RecognizedSegment>;
}

/// Builds a fresh recognizer for every session.
pub trait RecognizerFactory: Send + Sync {
    /// Backend name, for logs and the health endpoint.
    fn name(&self) -> &str;

    fn create(&self) -> Box<dyn OnlineRecognizer>;
}

/// Shared handle to the process-wide factory.
#[derive(Clone)]
pub struct RecognizerHandle(pub Arc<dyn RecognizerFactory>);

impl RecognizerHandle {
    pub fn new<F: RecognizerFactory + 'static>(factory: F) -> Self {
        Self(Arc::new(factory))
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn create(&self) -> Box<dyn OnlineRecognizer> {
        self.0.create()
    }
}

impl fmt::Debug for RecognizerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecognizerHandle")
            .field("backend", &self.name())
            .finish()
    }
}

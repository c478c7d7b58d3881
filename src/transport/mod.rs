//! # Transport Listeners
//!
//! Accept streaming connections and connect them to a [`SessionProcessor`].
//!
//! ## Per connection:
//! - **Reader** (the connection task): turns transport frames into
//!   [`InboundFrame`]s and hands them to the session one at a time
//! - **Writer** (spawned task): serializes [`ProtocolMessage`]s in the order
//!   the session produced them
//!
//! The two are joined by a bounded `mpsc` channel of
//! `streaming.outbound_queue` messages. Recognizer calls block, so every frame
//! is processed on tokio's blocking pool; the reader waits for it before
//! reading the next frame, which keeps one session strictly sequential while
//! other sessions keep running.

pub mod raw;
pub mod websocket;

use crate::error::{StreamError, StreamResult};
use crate::protocol::ProtocolMessage;
use crate::session::{InboundFrame, SessionProcessor};
use crate::state::AppState;
use crate::transcription::RecognizerHandle;
use tokio::sync::mpsc;
use tracing::debug;

/// Everything a listener needs to open sessions.
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub state: AppState,
    pub recognizer: RecognizerHandle,
}

impl StreamContext {
    pub fn new(state: AppState, recognizer: RecognizerHandle) -> Self {
        Self { state, recognizer }
    }

    /// Fresh IDLE session using the audio settings current at call time.
    pub fn new_session(&self) -> SessionProcessor {
        let audio = self.state.config.read().audio.clone();
        SessionProcessor::new(self.recognizer.create(), &audio)
    }

    pub fn outbound_queue(&self) -> usize {
        self.state.config.read().streaming.outbound_queue.max(1)
    }
}

/// Owns a session and runs each frame through it on the blocking pool.
pub struct SessionRunner {
    processor: Option<SessionProcessor>,
    trace_id: String,
    state: AppState,
}

impl SessionRunner {
    pub fn new(processor: SessionProcessor, state: AppState) -> Self {
        Self {
            trace_id: processor.trace_id().to_string(),
            processor: Some(processor),
            state,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn is_finished(&self) -> bool {
        self.processor.as_ref().map_or(true, SessionProcessor::is_finished)
    }

    /// Process one frame and return the messages it produced.
    ///
    /// Fails only if the blocking task died; the session is gone after that.
    pub async fn dispatch(&mut self, frame: InboundFrame) -> StreamResult<Vec<ProtocolMessage>> {
        if let InboundFrame::Audio(payload) = &frame {
            self.state.record_audio_bytes(payload.len());
        }

        let mut processor = self
            .processor
            .take()
            .ok_or_else(|| StreamError::Transport("session is no longer available".to_string()))?;

        let (processor, messages) = tokio::task::spawn_blocking(move || {
            let messages = processor.handle_frame(frame);
            (processor, messages)
        })
        .await
        .map_err(|err| StreamError::Transport(format!("session task failed: {}", err)))?;

        self.processor = Some(processor);
        for message in &messages {
            self.state.record_message(message);
        }
        Ok(messages)
    }
}

/// Queue messages for the writer. `false` once the writer has gone away.
pub async fn forward(
    outbound: &mpsc::Sender<ProtocolMessage>,
    messages: Vec<ProtocolMessage>,
    trace_id: &str,
) -> bool {
    for message in messages {
        if outbound.send(message).await.is_err() {
            debug!(trace_id, "Writer closed, dropping remaining messages");
            return false;
        }
    }
    true
}

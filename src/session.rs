//! # Session Processor
//!
//! One state machine per connection. It receives already-framed input from a
//! transport, drives the connection's own recognizer and returns the protocol
//! messages to send back, in order.
//!
//! ## States:
//! ```text
//! IDLE --START--> RECORDING --END--> FINISHED
//!                  |     ^
//!                  +-----+ audio / START (restart)
//! ```
//!
//! ## Rules:
//! - Every rejected input answers with a single `ERROR` and leaves the state
//!   as it was. The offending frame is dropped, never retried.
//! - A RESULT is only produced when the accumulator crosses the flush
//!   threshold, or at END for whatever audio is left over.
//! - Segment start times never go back past the last emitted end time.
//!
//! The processor does no I/O. Recognizer calls block, so transports run
//! [`SessionProcessor::handle_frame`] on a blocking thread.

use crate::audio::{AudioAccumulator, AudioFormat, FrameDecoder};
use crate::config::AudioConfig;
use crate::error::{StreamError, StreamResult};
use crate::protocol::{ControlCommand, ControlMessage, ProtocolMessage, TimedSegment, TranscriptFormatter};
use crate::transcription::OnlineRecognizer;
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Recording,
    Finished,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("IDLE"),
            SessionState::Recording => f.write_str("RECORDING"),
            SessionState::Finished => f.write_str("FINISHED"),
        }
    }
}

/// Transport-independent view of one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Text frame, expected to hold a JSON control command
    Control(String),

    /// Binary frame with PCM audio
    Audio(Vec<u8>),

    /// Anything the transport could not classify
    Unsupported(&'static str),
}

/// Per-session counters, logged when the session ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub audio_frames: u64,
    pub audio_bytes: u64,
    pub flushes: u64,
    pub results: u64,
    pub errors: u64,
}

pub struct SessionProcessor {
    trace_id: String,
    state: SessionState,
    recognizer: Box<dyn OnlineRecognizer>,
    decoder: FrameDecoder,
    buffer: AudioAccumulator,
    formatter: TranscriptFormatter,
    stats: SessionStats,
}

impl SessionProcessor {
    /// New IDLE session with a fresh UUID v4 trace id.
    pub fn new(recognizer: Box<dyn OnlineRecognizer>, audio: &AudioConfig) -> Self {
        Self::with_trace_id(Uuid::new_v4().to_string(), recognizer, audio)
    }

    pub fn with_trace_id(
        trace_id: impl Into<String>,
        recognizer: Box<dyn OnlineRecognizer>,
        audio: &AudioConfig,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            state: SessionState::Idle,
            recognizer,
            decoder: FrameDecoder::new(AudioFormat::from_config(audio)),
            buffer: AudioAccumulator::new(audio.min_chunk_seconds, audio.sample_rate),
            formatter: TranscriptFormatter::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == SessionState::Finished
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Samples waiting for the next flush.
    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }

    /// Handle one inbound frame and return the messages to send, in order.
    pub fn handle_frame(&mut self, frame: InboundFrame) -> Vec<ProtocolMessage> {
        match frame {
            InboundFrame::Control(text) => self.handle_control_text(&text),
            InboundFrame::Audio(payload) => self.handle_audio(&payload),
            InboundFrame::Unsupported(kind) => {
                let err = StreamError::Protocol(format!("unsupported frame type: {}", kind));
                vec![self.reject(err)]
            }
        }
    }

    pub fn handle_control_text(&mut self, text: &str) -> Vec<ProtocolMessage> {
        match ControlMessage::parse(text) {
            Ok(message) => self.handle_command(message),
            Err(err) => vec![self.reject(err)],
        }
    }

    pub fn handle_command(&mut self, message: ControlMessage) -> Vec<ProtocolMessage> {
        let outcome = match message.command {
            ControlCommand::Start => self.start(message.audio.as_ref()),
            ControlCommand::End => self.finish(),
        };
        self.respond(outcome)
    }

    pub fn handle_audio(&mut self, payload: &[u8]) -> Vec<ProtocolMessage> {
        let outcome = self.accept_audio(payload);
        self.respond(outcome)
    }

    fn respond(&mut self, outcome: StreamResult<Vec<ProtocolMessage>>) -> Vec<ProtocolMessage> {
        match outcome {
            Ok(messages) => messages,
            Err(err) => vec![self.reject(err)],
        }
    }

    /// Log a rejected input and build the ERROR that answers it.
    fn reject(&mut self, err: StreamError) -> ProtocolMessage {
        self.stats.errors += 1;
        warn!(
            trace_id = %self.trace_id,
            state = %self.state,
            kind = err.kind(),
            "Rejected input: {}",
            err
        );
        ProtocolMessage::error(&self.trace_id)
    }

    fn start(&mut self, claimed: Option<&AudioFormat>) -> StreamResult<Vec<ProtocolMessage>> {
        if self.state == SessionState::Finished {
            return Err(StreamError::Protocol("START after session finished".to_string()));
        }
        if let Some(claimed) = claimed {
            self.decoder.check_format(claimed)?;
        }

        if self.state == SessionState::Recording {
            info!(
                trace_id = %self.trace_id,
                discarded_samples = self.buffer.len(),
                "Session restarted"
            );
        } else {
            info!(trace_id = %self.trace_id, "Session started");
        }

        self.recognizer.init();
        self.formatter.reset();
        self.buffer.clear();
        self.state = SessionState::Recording;

        Ok(vec![ProtocolMessage::start(&self.trace_id)])
    }

    fn accept_audio(&mut self, payload: &[u8]) -> StreamResult<Vec<ProtocolMessage>> {
        if self.state != SessionState::Recording {
            return Err(StreamError::Protocol(format!(
                "audio received while {}",
                self.state
            )));
        }

        let samples = self.decoder.decode(payload)?;
        self.stats.audio_frames += 1;
        self.stats.audio_bytes += payload.len() as u64;
        self.buffer.push_samples(samples);

        if !self.buffer.ready_to_flush() {
            return Ok(Vec::new());
        }

        Ok(self
            .flush()
            .map(|segment| self.result(false, segment))
            .into_iter()
            .collect())
    }

    fn finish(&mut self) -> StreamResult<Vec<ProtocolMessage>> {
        if self.state != SessionState::Recording {
            return Err(StreamError::Protocol(format!("END received while {}", self.state)));
        }

        let mut messages = Vec::new();

        if !self.buffer.is_empty() {
            if let Some(segment) = self.flush() {
                messages.push(self.result(false, segment));
            }
        }

        let last = self.recognizer.finish();
        if let Some(segment) = self.formatter.stamp(last.as_ref()) {
            messages.push(self.result(true, segment));
        }

        messages.push(ProtocolMessage::end(&self.trace_id));
        self.state = SessionState::Finished;

        info!(
            trace_id = %self.trace_id,
            audio_frames = self.stats.audio_frames,
            audio_bytes = self.stats.audio_bytes,
            flushes = self.stats.flushes,
            results = self.stats.results,
            errors = self.stats.errors,
            "Session finished"
        );

        Ok(messages)
    }

    /// Hand everything buffered to the recognizer and stamp what comes back.
    fn flush(&mut self) -> Option<TimedSegment> {
        let samples = self.buffer.drain();
        self.stats.flushes += 1;
        debug!(
            trace_id = %self.trace_id,
            samples = samples.len(),
            seconds = self.decoder.seconds(samples.len()),
            "Flush"
        );

        self.recognizer.insert_audio_chunk(&samples);
        let segment = self.recognizer.process_iter();
        self.formatter.stamp(segment.as_ref())
    }

    fn result(&mut self, is_final: bool, segment: TimedSegment) -> ProtocolMessage {
        self.stats.results += 1;
        debug!(trace_id = %self.trace_id, is_final, "{}", segment);
        ProtocolMessage::result(&self.trace_id, is_final, &[segment])
    }
}

impl fmt::Debug for SessionProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionProcessor")
            .field("trace_id", &self.trace_id)
            .field("state", &self.state)
            .field("buffered_samples", &self.buffer.len())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RecognizedSegment, ResponseType};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Calls seen by the fake, shared with the test.
    #[derive(Debug, Default)]
    struct Calls {
        inits: usize,
        inserted: Vec<usize>,
        iters: usize,
        finishes: usize,
    }

    /// Replays a fixed script of `process_iter` results.
    struct FakeRecognizer {
        script: VecDeque<Option<RecognizedSegment>>,
        final_segment: Option<RecognizedSegment>,
        calls: Arc<Mutex<Calls>>,
    }

    impl OnlineRecognizer for FakeRecognizer {
        fn init(&mut self) {
            self.calls.lock().inits += 1;
        }

        fn insert_audio_chunk(&mut self, samples: &[f32]) {
            self.calls.lock().inserted.push(samples.len());
        }

        fn process_iter(&mut self) -> Option<RecognizedSegment> {
            self.calls.lock().iters += 1;
            self.script.pop_front().flatten()
        }

        fn finish(&mut self) -> Option<RecognizedSegment> {
            self.calls.lock().finishes += 1;
            self.final_segment.take()
        }
    }

    fn audio_config() -> AudioConfig {
        AudioConfig {
            sample_rate: 16000,
            channels: 1,
            subtype: "PCM_16".to_string(),
            min_chunk_seconds: 1.0,
        }
    }

    fn session(
        script: Vec<Option<RecognizedSegment>>,
        final_segment: Option<RecognizedSegment>,
    ) -> (SessionProcessor, Arc<Mutex<Calls>>) {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let recognizer = FakeRecognizer {
            script: script.into(),
            final_segment,
            calls: Arc::clone(&calls),
        };
        let processor = SessionProcessor::with_trace_id("trace-1", Box::new(recognizer), &audio_config());
        (processor, calls)
    }

    /// A quarter second of PCM16 audio.
    fn quarter_second() -> Vec<u8> {
        vec![0x10; 4000 * 2]
    }

    fn start() -> InboundFrame {
        InboundFrame::Control(r#"{"command": "START"}"#.to_string())
    }

    fn end() -> InboundFrame {
        InboundFrame::Control(r#"{"command": "END"}"#.to_string())
    }

    fn kinds(messages: &[ProtocolMessage]) -> Vec<ResponseType> {
        messages.iter().map(|m| m.resp_type()).collect()
    }

    #[test]
    fn test_start_emits_start_and_inits_recognizer() {
        let (mut processor, calls) = session(vec![], None);
        let out = processor.handle_frame(start());

        assert_eq!(out, vec![ProtocolMessage::start("trace-1")]);
        assert_eq!(processor.state(), SessionState::Recording);
        assert_eq!(calls.lock().inits, 1);
    }

    #[test]
    fn test_result_only_after_threshold_is_crossed() {
        let (mut processor, calls) =
            session(vec![Some(RecognizedSegment::new(0.1, 0.8, "hi"))], None);
        processor.handle_frame(start());

        for _ in 0..3 {
            assert!(processor.handle_frame(InboundFrame::Audio(quarter_second())).is_empty());
        }
        assert!(calls.lock().inserted.is_empty());

        let out = processor.handle_frame(InboundFrame::Audio(quarter_second()));
        assert_eq!(kinds(&out), vec![ResponseType::Result]);

        let segment = &out[0].segments()[0];
        assert_eq!(segment.start_time, "100.00");
        assert_eq!(segment.end_time, "800.00");
        assert_eq!(segment.result.text, "hi");
        assert!(!segment.is_final);

        assert_eq!(calls.lock().inserted, vec![16000]);
        assert_eq!(processor.buffered_samples(), 0);
    }

    #[test]
    fn test_flush_without_text_emits_nothing() {
        let (mut processor, calls) = session(vec![None], None);
        processor.handle_frame(start());

        let out = processor.handle_frame(InboundFrame::Audio(vec![0; 32000]));
        assert!(out.is_empty());
        assert_eq!(calls.lock().iters, 1);
    }

    #[test]
    fn test_end_flushes_residual_then_finishes() {
        let (mut processor, calls) = session(
            vec![Some(RecognizedSegment::new(0.0, 0.25, "residual"))],
            Some(RecognizedSegment::new(0.25, 0.5, "tail")),
        );
        processor.handle_frame(start());
        processor.handle_frame(InboundFrame::Audio(quarter_second()));

        let out = processor.handle_frame(end());
        assert_eq!(
            kinds(&out),
            vec![ResponseType::Result, ResponseType::Result, ResponseType::End]
        );
        assert_eq!(out[0].segments()[0].result.text, "residual");
        assert!(!out[0].segments()[0].is_final);
        assert_eq!(out[1].segments()[0].result.text, "tail");
        assert!(out[1].segments()[0].is_final);

        let calls = calls.lock();
        assert_eq!(calls.inserted, vec![4000]);
        assert_eq!(calls.finishes, 1);
        assert_eq!(processor.state(), SessionState::Finished);
    }

    #[test]
    fn test_end_with_empty_buffer_skips_flush() {
        let (mut processor, calls) = session(vec![], None);
        processor.handle_frame(start());

        let out = processor.handle_frame(end());
        assert_eq!(out, vec![ProtocolMessage::end("trace-1")]);
        assert_eq!(calls.lock().iters, 0);
        assert_eq!(calls.lock().finishes, 1);
    }

    #[test]
    fn test_end_before_start_is_error() {
        let (mut processor, calls) = session(vec![], None);

        let out = processor.handle_frame(end());
        assert_eq!(out, vec![ProtocolMessage::error("trace-1")]);
        assert_eq!(processor.state(), SessionState::Idle);
        assert_eq!(calls.lock().finishes, 0);

        // the session is still usable
        assert_eq!(kinds(&processor.handle_frame(start())), vec![ResponseType::Start]);
    }

    #[test]
    fn test_audio_before_start_is_error() {
        let (mut processor, _) = session(vec![], None);
        let out = processor.handle_frame(InboundFrame::Audio(quarter_second()));
        assert_eq!(kinds(&out), vec![ResponseType::Error]);
        assert_eq!(processor.buffered_samples(), 0);
    }

    #[test]
    fn test_results_never_go_back_in_time() {
        let (mut processor, _) = session(
            vec![
                Some(RecognizedSegment::new(0.0, 1.2, "one")),
                Some(RecognizedSegment::new(0.9, 2.0, "two")),
            ],
            None,
        );
        processor.handle_frame(start());

        let first = processor.handle_frame(InboundFrame::Audio(vec![0; 32000]));
        let second = processor.handle_frame(InboundFrame::Audio(vec![0; 32000]));

        assert_eq!(first[0].segments()[0].end_time, "1200.00");
        assert_eq!(second[0].segments()[0].start_time, "1200.00");
        assert_eq!(second[0].segments()[0].end_time, "2000.00");
    }

    #[test]
    fn test_decode_error_keeps_state_and_buffer() {
        let (mut processor, _) = session(vec![], None);
        processor.handle_frame(start());
        processor.handle_frame(InboundFrame::Audio(quarter_second()));

        let out = processor.handle_frame(InboundFrame::Audio(vec![0; 3]));
        assert_eq!(out, vec![ProtocolMessage::error("trace-1")]);
        assert_eq!(processor.state(), SessionState::Recording);
        assert_eq!(processor.buffered_samples(), 4000);
        assert_eq!(processor.stats().errors, 1);
    }

    #[test]
    fn test_bad_control_frames_are_errors() {
        let (mut processor, _) = session(vec![], None);
        for frame in [
            InboundFrame::Control(r#"{"command": "PAUSE"}"#.to_string()),
            InboundFrame::Control("garbage".to_string()),
            InboundFrame::Unsupported("frame"),
        ] {
            assert_eq!(kinds(&processor.handle_frame(frame)), vec![ResponseType::Error]);
        }
        assert_eq!(processor.state(), SessionState::Idle);
    }

    #[test]
    fn test_unsupported_format_in_start_stays_idle() {
        let (mut processor, calls) = session(vec![], None);
        let out = processor.handle_frame(InboundFrame::Control(
            r#"{"command": "START", "audio": {"sample_rate": 44100, "channels": 1}}"#.to_string(),
        ));
        assert_eq!(kinds(&out), vec![ResponseType::Error]);
        assert_eq!(processor.state(), SessionState::Idle);
        assert_eq!(calls.lock().inits, 0);
    }

    #[test]
    fn test_restart_discards_buffer_and_resets_timeline() {
        let (mut processor, calls) = session(
            vec![
                Some(RecognizedSegment::new(0.0, 3.0, "first")),
                Some(RecognizedSegment::new(0.5, 1.0, "again")),
            ],
            None,
        );
        processor.handle_frame(start());
        processor.handle_frame(InboundFrame::Audio(vec![0; 32000]));
        processor.handle_frame(InboundFrame::Audio(quarter_second()));

        assert_eq!(kinds(&processor.handle_frame(start())), vec![ResponseType::Start]);
        assert_eq!(processor.buffered_samples(), 0);
        assert_eq!(calls.lock().inits, 2);

        let out = processor.handle_frame(InboundFrame::Audio(vec![0; 32000]));
        assert_eq!(out[0].segments()[0].start_time, "500.00");
    }

    #[test]
    fn test_finished_session_rejects_everything() {
        let (mut processor, _) = session(vec![], None);
        processor.handle_frame(start());
        processor.handle_frame(end());

        for frame in [start(), end(), InboundFrame::Audio(quarter_second())] {
            assert_eq!(kinds(&processor.handle_frame(frame)), vec![ResponseType::Error]);
        }
        assert!(processor.is_finished());
    }

    #[test]
    fn test_generated_trace_ids_are_unique() {
        let a = SessionProcessor::new(
            Box::new(crate::transcription::StubRecognizer::new(16000, "a")),
            &audio_config(),
        );
        let b = SessionProcessor::new(
            Box::new(crate::transcription::StubRecognizer::new(16000, "b")),
            &audio_config(),
        );
        assert_ne!(a.trace_id(), b.trace_id());
        assert!(Uuid::parse_str(a.trace_id()).is_ok());
    }
}

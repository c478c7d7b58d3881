//! Wire messages exchanged with streaming peers.
//!
//! ## Peer → server (text frames):
//! ```json
//! {"command": "START"}
//! {"command": "START", "audio": {"sample_rate": 16000, "channels": 1, "subtype": "PCM_16"}}
//! {"command": "END"}
//! ```
//!
//! ## Server → peer:
//! ```json
//! {"resp_type": "START", "trace_id": "..."}
//! {"resp_type": "RESULT", "trace_id": "...", "segments": [
//!     {"start_time": "100.00", "end_time": "800.00", "is_final": false,
//!      "result": {"text": "hi", "word_info": [], "score": 0.0}}]}
//! {"resp_type": "END", "trace_id": "..."}
//! {"resp_type": "ERROR", "trace_id": "..."}
//! ```

use crate::audio::AudioFormat;
use crate::error::{StreamError, StreamResult};
use crate::protocol::segment::{parse_compact_segment, TimedSegment};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of a server → peer message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseType {
    Start,
    Result,
    End,
    Error,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Start => "START",
            ResponseType::Result => "RESULT",
            ResponseType::End => "END",
            ResponseType::Error => "ERROR",
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseType {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "START" => Ok(ResponseType::Start),
            "RESULT" => Ok(ResponseType::Result),
            "END" => Ok(ResponseType::End),
            "ERROR" => Ok(ResponseType::Error),
            other => Err(StreamError::Protocol(format!("unknown message type: {}", other))),
        }
    }
}

/// Word-level timing. Part of the wire schema, never populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordInfo {
    pub start_time: f64,
    pub end_time: f64,
    pub word: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentResult {
    pub text: String,
    pub word_info: Vec<WordInfo>,
    pub score: f64,
}

/// One transcript segment inside a RESULT message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentPayload {
    /// Milliseconds, two decimals, as a string
    pub start_time: String,
    pub end_time: String,
    pub is_final: bool,
    pub result: SegmentResult,
}

impl SegmentPayload {
    /// Times keep two decimals: `"12.5 800 hi"` → `"12.50"`, `"800.00"`.
    pub fn from_timed(segment: &TimedSegment, is_final: bool) -> Self {
        Self {
            start_time: format!("{:.2}", segment.start_ms),
            end_time: format!("{:.2}", segment.end_ms),
            is_final,
            result: SegmentResult {
                text: segment.text.clone(),
                word_info: Vec::new(),
                score: 0.0,
            },
        }
    }
}

/// Server → peer message. Serialized with `resp_type` as the tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resp_type", rename_all = "UPPERCASE")]
pub enum ProtocolMessage {
    Start {
        trace_id: String,
    },
    Result {
        trace_id: String,
        segments: Vec<SegmentPayload>,
    },
    End {
        trace_id: String,
    },
    Error {
        trace_id: String,
    },
}

impl ProtocolMessage {
    /// Build a message from already structured segments.
    ///
    /// `segments` and `is_final` only matter for RESULT.
    pub fn new(
        resp_type: ResponseType,
        trace_id: &str,
        is_final: bool,
        segments: &[TimedSegment],
    ) -> Self {
        let trace_id = trace_id.to_string();
        match resp_type {
            ResponseType::Start => ProtocolMessage::Start { trace_id },
            ResponseType::Result => ProtocolMessage::Result {
                trace_id,
                segments: segments
                    .iter()
                    .map(|segment| SegmentPayload::from_timed(segment, is_final))
                    .collect(),
            },
            ResponseType::End => ProtocolMessage::End { trace_id },
            ResponseType::Error => ProtocolMessage::Error { trace_id },
        }
    }

    pub fn start(trace_id: &str) -> Self {
        Self::new(ResponseType::Start, trace_id, false, &[])
    }

    pub fn result(trace_id: &str, is_final: bool, segments: &[TimedSegment]) -> Self {
        Self::new(ResponseType::Result, trace_id, is_final, segments)
    }

    pub fn end(trace_id: &str) -> Self {
        Self::new(ResponseType::End, trace_id, true, &[])
    }

    pub fn error(trace_id: &str) -> Self {
        Self::new(ResponseType::Error, trace_id, false, &[])
    }

    pub fn resp_type(&self) -> ResponseType {
        match self {
            ProtocolMessage::Start { .. } => ResponseType::Start,
            ProtocolMessage::Result { .. } => ResponseType::Result,
            ProtocolMessage::End { .. } => ResponseType::End,
            ProtocolMessage::Error { .. } => ResponseType::Error,
        }
    }

    pub fn trace_id(&self) -> &str {
        match self {
            ProtocolMessage::Start { trace_id }
            | ProtocolMessage::Result { trace_id, .. }
            | ProtocolMessage::End { trace_id }
            | ProtocolMessage::Error { trace_id } => trace_id,
        }
    }

    /// Segments of a RESULT message, empty for every other kind.
    pub fn segments(&self) -> &[SegmentPayload] {
        match self {
            ProtocolMessage::Result { segments, .. } => segments,
            _ => &[],
        }
    }

    pub fn to_json(&self) -> StreamResult<String> {
        serde_json::to_string(self)
            .map_err(|err| StreamError::Protocol(format!("failed to serialize message: {}", err)))
    }
}

/// Build a message from its textual parts.
///
/// `resp_type` must name one of START, RESULT, END or ERROR. For RESULT every
/// entry of `lines` is a compact segment (`"100 800 hi"`) and becomes one
/// segment payload; other kinds ignore `lines`.
pub fn build_message(
    resp_type: &str,
    trace_id: &str,
    is_final: bool,
    lines: &[&str],
) -> StreamResult<ProtocolMessage> {
    let resp_type: ResponseType = resp_type.parse()?;

    let segments = match resp_type {
        ResponseType::Result => lines
            .iter()
            .map(|line| parse_compact_segment(line))
            .collect::<StreamResult<Vec<_>>>()?,
        _ => Vec::new(),
    };

    Ok(ProtocolMessage::new(resp_type, trace_id, is_final, &segments))
}

/// Peer → server control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    End,
}

impl FromStr for ControlCommand {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "START" => Ok(ControlCommand::Start),
            "END" => Ok(ControlCommand::End),
            other => Err(StreamError::Protocol(format!("unknown command: {}", other))),
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::Start => f.write_str("START"),
            ControlCommand::End => f.write_str("END"),
        }
    }
}

#[derive(Deserialize)]
struct RawControl {
    command: String,
    #[serde(default)]
    audio: Option<AudioFormat>,
}

/// A parsed control text frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlMessage {
    pub command: ControlCommand,

    /// Format the peer claims for the audio that follows a START
    pub audio: Option<AudioFormat>,
}

impl ControlMessage {
    pub fn new(command: ControlCommand) -> Self {
        Self {
            command,
            audio: None,
        }
    }

    pub fn parse(text: &str) -> StreamResult<Self> {
        let raw: RawControl = serde_json::from_str(text)
            .map_err(|err| StreamError::Protocol(format!("invalid control message: {}", err)))?;

        Ok(Self {
            command: raw.command.parse()?,
            audio: raw.audio,
        })
    }
}

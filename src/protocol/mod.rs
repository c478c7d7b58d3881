//! # Message Codec
//!
//! Everything that crosses the wire as text: control commands from the peer,
//! START/RESULT/END/ERROR responses, and the compact `"start end text"`
//! segment rendering.

pub mod message;
pub mod segment;

pub use message::{
    build_message, ControlCommand, ControlMessage, ProtocolMessage, ResponseType, SegmentPayload,
    SegmentResult, WordInfo,
};
pub use segment::{parse_compact_segment, RecognizedSegment, TimedSegment, TranscriptFormatter};

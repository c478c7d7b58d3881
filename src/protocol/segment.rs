//! Transcript segments and their compact text form.
//!
//! The recognizer reports segments in seconds. Before a segment reaches the
//! wire it is stamped by a [`TranscriptFormatter`]: converted to milliseconds
//! and clamped so that it never starts before the previous segment ended.
//!
//! The compact form `"<start> <end> <text>"` is only a rendering of a
//! [`TimedSegment`] (`Display` / `FromStr`), used for logs and by peers
//! that speak the line-based format.

use crate::error::{StreamError, StreamResult};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::debug;

/// Segment as produced by the recognizer, times in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl RecognizedSegment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

/// Segment ready for the wire, times in milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedSegment {
    pub start_ms: f64,
    pub end_ms: f64,
    pub text: String,
}

impl TimedSegment {
    pub fn new(start_ms: f64, end_ms: f64, text: impl Into<String>) -> Self {
        Self {
            start_ms,
            end_ms,
            text: text.into(),
        }
    }
}

/// Renders whole milliseconds, ties to even: `"1200 3400 hello"`.
impl fmt::Display for TimedSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.0} {:.0} {}", self.start_ms, self.end_ms, self.text)
    }
}

impl FromStr for TimedSegment {
    type Err = StreamError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        parse_compact_segment(line)
    }
}

/// Anchored `<number> <number> <text>`; numbers are `12`, `12.5` or `12.`.
static COMPACT_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+\.?\d*) (\d+\.?\d*) (.*)$").expect("compact segment pattern is valid")
});

/// Parse `"<number> <number> <text>"`.
///
/// Both numbers are unsigned integers or decimals and must lead the line.
/// The text is everything after the second space and may itself contain
/// spaces. A trailing line break is ignored.
pub fn parse_compact_segment(line: &str) -> StreamResult<TimedSegment> {
    let line = line.trim_end_matches(['\r', '\n']);
    let malformed = || StreamError::Parse(format!("not a compact segment: {:?}", line));

    let caps = COMPACT_SEGMENT.captures(line).ok_or_else(malformed)?;
    let number = |idx: usize| caps[idx].parse::<f64>().map_err(|_| malformed());

    Ok(TimedSegment::new(number(1)?, number(2)?, &caps[3]))
}

/// Per-session stamping state; enforces monotonic output.
#[derive(Debug, Default)]
pub struct TranscriptFormatter {
    last_end_ms: Option<f64>,
}

impl TranscriptFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the previous end time (new utterance).
    pub fn reset(&mut self) {
        self.last_end_ms = None;
    }

    pub fn last_end_ms(&self) -> Option<f64> {
        self.last_end_ms
    }

    /// Stamp a recognizer segment for output.
    ///
    /// `None` means the recognizer had nothing new. Otherwise the segment is
    /// converted to whole milliseconds (ties to even), its start is raised to the last emitted end
    /// if it would precede it, and its end becomes the new last end.
    pub fn stamp(&mut self, segment: Option<&RecognizedSegment>) -> Option<TimedSegment> {
        let Some(segment) = segment else {
            debug!("No text in this segment");
            return None;
        };

        let mut start_ms = (segment.start * 1000.0).round_ties_even();
        let end_ms = (segment.end * 1000.0).round_ties_even();

        if let Some(last_end_ms) = self.last_end_ms {
            start_ms = start_ms.max(last_end_ms);
        }
        self.last_end_ms = Some(end_ms);

        Some(TimedSegment::new(start_ms, end_ms, segment.text.clone()))
    }

    /// Stamp a segment and render it in compact form.
    pub fn format_output_transcript(&mut self, segment: Option<&RecognizedSegment>) -> Option<String> {
        self.stamp(segment).map(|timed| timed.to_string())
    }
}

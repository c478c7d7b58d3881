//! # Raw TCP Listener
//!
//! For clients that cannot speak websocket: the connection is a plain byte
//! stream of PCM audio, the session starts as soon as the connection is
//! accepted, and output comes back as newline-delimited JSON. The server
//! closes the connection once END has been written.
//!
//! ## Framing (`streaming.raw_framing`):
//! - `terminator`: the stream ends with the literal bytes `END`. Audio that
//!   happens to end in those bytes ends the stream early.
//! - `length_prefixed`: each chunk is a big-endian `u32` length followed by
//!   that many bytes; a zero length ends the stream.
//!
//! A peer that disconnects without ending the stream loses its session; no
//! final transcript is produced.

use crate::config::RawFraming;
use crate::error::{StreamError, StreamResult};
use crate::protocol::ProtocolMessage;
use crate::session::InboundFrame;
use crate::transport::{forward, SessionRunner, StreamContext};
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Largest read, and largest accepted length-prefixed chunk.
pub const READ_CHUNK_BYTES: usize = 64 * 1024;

pub const TERMINATOR: &[u8] = b"END";

const START_COMMAND: &str = r#"{"command": "START"}"#;
const END_COMMAND: &str = r#"{"command": "END"}"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    Audio(Vec<u8>),
    End,
}

/// Splits a terminator-framed byte stream into audio payloads.
///
/// Bytes that could be the start of a terminator split across reads (`E`,
/// `EN`) are held back, as is a trailing odd byte, so no payload ever ends
/// mid-sample.
#[derive(Debug, Default)]
pub struct TerminatorFramer {
    carry: Vec<u8>,
    finished: bool,
}

impl TerminatorFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Bytes held back for the next read.
    pub fn pending(&self) -> usize {
        self.carry.len()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<RawEvent> {
        if self.finished {
            return Vec::new();
        }

        self.carry.extend_from_slice(bytes);
        let mut events = Vec::new();

        if self.carry.ends_with(TERMINATOR) {
            let mut payload = std::mem::take(&mut self.carry);
            payload.truncate(payload.len() - TERMINATOR.len());
            if !payload.is_empty() {
                events.push(RawEvent::Audio(payload));
            }
            events.push(RawEvent::End);
            self.finished = true;
            return events;
        }

        let mut keep = partial_terminator_len(&self.carry);
        if (self.carry.len() - keep) % 2 == 1 {
            keep += 1;
        }

        let cut = self.carry.len() - keep;
        if cut > 0 {
            events.push(RawEvent::Audio(self.carry.drain(..cut).collect()));
        }
        events
    }
}

/// Length of the longest proper prefix of the terminator that ends `data`.
fn partial_terminator_len(data: &[u8]) -> usize {
    (1..TERMINATOR.len())
        .rev()
        .find(|&n| data.ends_with(&TERMINATOR[..n]))
        .unwrap_or(0)
}

/// Reads [`RawEvent`]s from a raw connection with either framing.
pub struct RawFrameReader<R> {
    reader: R,
    framing: RawFraming,
    framer: TerminatorFramer,
    ready: VecDeque<RawEvent>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> RawFrameReader<R> {
    pub fn new(reader: R, framing: RawFraming) -> Self {
        Self {
            reader,
            framing,
            framer: TerminatorFramer::new(),
            ready: VecDeque::new(),
            buf: vec![0; READ_CHUNK_BYTES],
        }
    }

    /// Next event, or `None` on EOF before the end of the stream.
    pub async fn next_event(&mut self) -> StreamResult<Option<RawEvent>> {
        match self.framing {
            RawFraming::Terminator => self.next_terminated().await,
            RawFraming::LengthPrefixed => self.next_length_prefixed().await,
        }
    }

    async fn next_terminated(&mut self) -> StreamResult<Option<RawEvent>> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Ok(Some(event));
            }
            if self.framer.is_finished() {
                return Ok(None);
            }

            let read = self.reader.read(&mut self.buf).await?;
            if read == 0 {
                if self.framer.pending() > 0 {
                    debug!(bytes = self.framer.pending(), "EOF with unterminated trailing bytes");
                }
                return Ok(None);
            }
            self.ready.extend(self.framer.push(&self.buf[..read]));
        }
    }

    async fn next_length_prefixed(&mut self) -> StreamResult<Option<RawEvent>> {
        let len = match self.reader.read_u32().await {
            Ok(len) => len as usize,
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        if len == 0 {
            return Ok(Some(RawEvent::End));
        }
        if len > READ_CHUNK_BYTES {
            return Err(StreamError::Protocol(format!(
                "chunk of {} bytes exceeds the {} byte limit",
                len, READ_CHUNK_BYTES
            )));
        }

        let mut payload = vec![0; len];
        match self.reader.read_exact(&mut payload).await {
            Ok(_) => Ok(Some(RawEvent::Audio(payload))),
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Accept raw connections until the task is dropped.
pub async fn serve(listener: TcpListener, ctx: StreamContext) {
    if let Ok(addr) = listener.local_addr() {
        info!("Raw stream listener on tcp://{}", addr);
    }

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = %err, "Failed to accept raw connection");
                continue;
            }
        };

        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, peer, ctx).await {
                debug!(%peer, error = %err, "Raw connection ended with error");
            }
        });
    }
}

/// Run one raw connection to completion.
pub async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: StreamContext) -> StreamResult<()> {
    let Some(_slot) = ctx.state.try_open_session() else {
        warn!(%peer, "Session limit reached, dropping raw connection");
        return Ok(());
    };

    let framing = ctx.state.config.read().streaming.raw_framing;
    let mut runner = SessionRunner::new(ctx.new_session(), ctx.state.clone());
    let trace_id = runner.trace_id().to_string();
    info!(%trace_id, %peer, transport = "raw", ?framing, "Connection accepted");

    let (read_half, mut write_half) = stream.into_split();
    let (outbound, mut queued) = mpsc::channel::<ProtocolMessage>(ctx.outbound_queue());

    let writer_trace_id = trace_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = queued.recv().await {
            let mut line = match message.to_json() {
                Ok(line) => line,
                Err(err) => {
                    warn!(trace_id = %writer_trace_id, error = %err, "Dropping unserializable message");
                    continue;
                }
            };
            line.push('\n');
            if let Err(err) = write_half.write_all(line.as_bytes()).await {
                debug!(trace_id = %writer_trace_id, error = %err, "Send failed, peer is gone");
                return;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let started = runner.dispatch(InboundFrame::Control(START_COMMAND.to_string())).await?;
    let mut open = forward(&outbound, started, &trace_id).await;

    let mut frames = RawFrameReader::new(read_half, framing);
    while open {
        let event = match frames.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => {
                info!(%trace_id, "Stream ended without terminator, discarding session");
                break;
            }
            Err(err) if err.is_recoverable() => {
                let messages = runner.dispatch(InboundFrame::Unsupported("oversized chunk")).await?;
                forward(&outbound, messages, &trace_id).await;
                warn!(%trace_id, error = %err, "Cannot resynchronise raw stream, closing");
                break;
            }
            Err(err) => {
                debug!(%trace_id, error = %err, "Receive failed");
                break;
            }
        };

        let (frame, last) = match event {
            RawEvent::Audio(payload) => (InboundFrame::Audio(payload), false),
            RawEvent::End => (InboundFrame::Control(END_COMMAND.to_string()), true),
        };

        let messages = runner.dispatch(frame).await?;
        open = forward(&outbound, messages, &trace_id).await && !last;
    }

    drop(outbound);
    let _ = writer.await;
    info!(%trace_id, %peer, finished = runner.is_finished(), "Connection closed");
    Ok(())
}

//! # WebSocket Listener
//!
//! Text frames carry control commands, binary frames carry PCM audio. Every
//! outbound message is one text frame holding its JSON. The connection stays
//! open after END until the peer closes it.

use crate::error::StreamResult;
use crate::protocol::ProtocolMessage;
use crate::session::InboundFrame;
use crate::transport::{forward, SessionRunner, StreamContext};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Accept websocket connections until the task is dropped.
pub async fn serve(listener: TcpListener, ctx: StreamContext) {
    if let Ok(addr) = listener.local_addr() {
        info!("WebSocket listener on ws://{}", addr);
    }

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = %err, "Failed to accept websocket connection");
                continue;
            }
        };

        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, peer, ctx).await {
                debug!(%peer, error = %err, "WebSocket connection ended with error");
            }
        });
    }
}

/// Run one websocket connection to completion.
pub async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: StreamContext) -> StreamResult<()> {
    let mut socket = tokio_tungstenite::accept_async(stream).await?;

    let Some(_slot) = ctx.state.try_open_session() else {
        warn!(%peer, "Session limit reached, refusing websocket connection");
        socket
            .close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: "too many concurrent sessions".into(),
            }))
            .await?;
        return Ok(());
    };

    let mut runner = SessionRunner::new(ctx.new_session(), ctx.state.clone());
    let trace_id = runner.trace_id().to_string();
    info!(%trace_id, %peer, transport = "websocket", "Connection accepted");

    let (mut sink, mut source) = socket.split();
    let (outbound, queued) = mpsc::channel::<ProtocolMessage>(ctx.outbound_queue());

    let writer_trace_id = trace_id.clone();
    let writer = tokio::spawn(async move {
        let mut queued = ReceiverStream::new(queued);
        while let Some(message) = queued.next().await {
            let payload = match message.to_json() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(trace_id = %writer_trace_id, error = %err, "Dropping unserializable message");
                    continue;
                }
            };
            if let Err(err) = sink.send(Message::Text(payload)).await {
                debug!(trace_id = %writer_trace_id, error = %err, "Send failed, peer is gone");
                return;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(received) = source.next().await {
        let message = match received {
            Ok(message) => message,
            Err(err) => {
                debug!(%trace_id, error = %err, "Receive failed");
                break;
            }
        };

        let frame = match message {
            Message::Text(text) => InboundFrame::Control(text),
            Message::Binary(data) => InboundFrame::Audio(data),
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => break,
            Message::Frame(_) => InboundFrame::Unsupported("raw frame"),
        };

        let messages = runner.dispatch(frame).await?;
        if !forward(&outbound, messages, &trace_id).await {
            break;
        }
    }

    drop(outbound);
    let _ = writer.await;
    info!(%trace_id, %peer, finished = runner.is_finished(), "Connection closed");
    Ok(())
}

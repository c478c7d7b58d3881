mod common;

use asr_stream_server::config::RawFraming;
use asr_stream_server::transport::raw::{READ_CHUNK_BYTES, TERMINATOR};
use asr_stream_server::{AppConfig, ProtocolMessage, ResponseType};
use common::{command, connect, loud_pcm, next_message, spawn_raw, spawn_websocket, stub_recognizer};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

fn millis(value: &str) -> f64 {
    value.parse().unwrap()
}

#[tokio::test]
async fn websocket_session_end_to_end() {
    let (addr, state) = spawn_websocket(AppConfig::default(), stub_recognizer()).await;
    let mut client = connect(addr).await;

    client.send(command("START")).await.unwrap();
    let start = next_message(&mut client).await;
    assert_eq!(start.resp_type(), ResponseType::Start);
    let trace_id = start.trace_id().to_string();

    // two seconds of audio in quarter-second frames
    for _ in 0..8 {
        client.send(Message::Binary(loud_pcm(4000))).await.unwrap();
    }

    let first = next_message(&mut client).await;
    let second = next_message(&mut client).await;
    assert_eq!(first.resp_type(), ResponseType::Result);
    assert_eq!(second.resp_type(), ResponseType::Result);
    assert_eq!(first.segments()[0].end_time, "1000.00");
    assert_eq!(second.segments()[0].start_time, "1000.00");
    assert_eq!(second.segments()[0].end_time, "2000.00");

    client.send(command("END")).await.unwrap();
    let end = next_message(&mut client).await;
    assert_eq!(end, ProtocolMessage::end(&trace_id));

    client.close(None).await.unwrap();

    let metrics = state.get_metrics_snapshot();
    assert_eq!(metrics.total_sessions, 1);
    assert_eq!(metrics.results_emitted, 2);
    assert_eq!(metrics.audio_bytes_received, 8 * 4000 * 2);
}

#[tokio::test]
async fn websocket_reports_errors_and_keeps_listening() {
    let (addr, _) = spawn_websocket(AppConfig::default(), stub_recognizer()).await;

    let mut client = connect(addr).await;
    client.send(command("END")).await.unwrap();
    assert_eq!(next_message(&mut client).await.resp_type(), ResponseType::Error);

    client.send(Message::Text("not json".to_string())).await.unwrap();
    assert_eq!(next_message(&mut client).await.resp_type(), ResponseType::Error);

    client.send(command("START")).await.unwrap();
    client.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
    assert_eq!(next_message(&mut client).await.resp_type(), ResponseType::Start);
    assert_eq!(next_message(&mut client).await.resp_type(), ResponseType::Error);
    drop(client);

    // a new connection gets a fresh session
    let mut other = connect(addr).await;
    other.send(command("START")).await.unwrap();
    assert_eq!(next_message(&mut other).await.resp_type(), ResponseType::Start);
}

#[tokio::test]
async fn websocket_refuses_sessions_over_the_limit() {
    let mut config = AppConfig::default();
    config.performance.max_concurrent_sessions = 1;
    let (addr, state) = spawn_websocket(config, stub_recognizer()).await;

    let mut first = connect(addr).await;
    first.send(command("START")).await.unwrap();
    assert_eq!(next_message(&mut first).await.resp_type(), ResponseType::Start);

    let mut second = connect(addr).await;
    let closed = tokio::time::timeout(Duration::from_secs(5), second.next())
        .await
        .unwrap();
    match closed {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(frame.code, CloseCode::Policy),
        other => panic!("expected a policy close, got {:?}", other),
    }
    assert_eq!(state.get_metrics_snapshot().rejected_sessions, 1);
}

#[tokio::test]
async fn raw_upload_is_fully_processed_before_end() {
    let (addr, _) = spawn_raw(AppConfig::default(), stub_recognizer()).await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();

    let audio = loud_pcm(READ_CHUNK_BYTES * 3 / 2);
    for chunk in audio.chunks(READ_CHUNK_BYTES) {
        write_half.write_all(chunk).await.unwrap();
    }
    write_half.write_all(TERMINATOR).await.unwrap();

    let mut lines = BufReader::new(read_half).lines();
    let mut messages = Vec::new();
    while let Some(line) = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .unwrap()
        .unwrap()
    {
        messages.push(serde_json::from_str::<ProtocolMessage>(&line).unwrap());
    }

    assert_eq!(messages.first().unwrap().resp_type(), ResponseType::Start);
    assert_eq!(messages.last().unwrap().resp_type(), ResponseType::End);

    let segments: Vec<_> = messages.iter().flat_map(|m| m.segments().to_vec()).collect();
    assert!(!segments.is_empty());
    for pair in segments.windows(2) {
        assert_eq!(pair[0].end_time, pair[1].start_time);
    }

    // 3 x 64 KiB of PCM16 at 16 kHz is 6.144 seconds
    assert_eq!(millis(&segments.last().unwrap().end_time), 6144.0);
}

#[tokio::test]
async fn raw_length_prefixed_stream() {
    let mut config = AppConfig::default();
    config.streaming.raw_framing = RawFraming::LengthPrefixed;
    let (addr, _) = spawn_raw(config, stub_recognizer()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // audio that ends in the bytes of the terminator
    let mut chunk = loud_pcm(999);
    chunk.extend_from_slice(b"EN");
    chunk.extend_from_slice(b"D\0");
    for _ in 0..20 {
        stream.write_all(&(chunk.len() as u32).to_be_bytes()).await.unwrap();
        stream.write_all(&chunk).await.unwrap();
    }
    stream.write_all(&0u32.to_be_bytes()).await.unwrap();

    let mut lines = BufReader::new(stream).lines();
    let mut kinds = Vec::new();
    while let Some(line) = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .unwrap()
        .unwrap()
    {
        kinds.push(serde_json::from_str::<ProtocolMessage>(&line).unwrap().resp_type());
    }

    assert_eq!(kinds.first(), Some(&ResponseType::Start));
    assert_eq!(kinds.last(), Some(&ResponseType::End));
    assert!(kinds.contains(&ResponseType::Result));
    assert!(!kinds.contains(&ResponseType::Error));
}

#[tokio::test]
async fn raw_disconnect_without_terminator_discards_session() {
    let (addr, state) = spawn_raw(AppConfig::default(), stub_recognizer()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&loud_pcm(1000)).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut lines = BufReader::new(stream).lines();
    let mut kinds = Vec::new();
    while let Some(line) = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .unwrap()
        .unwrap()
    {
        kinds.push(serde_json::from_str::<ProtocolMessage>(&line).unwrap().resp_type());
    }

    assert_eq!(kinds, vec![ResponseType::Start]);

    // the slot is released once the connection task is done
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
}

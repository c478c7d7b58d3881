#![allow(dead_code)]

use asr_stream_server::protocol::RecognizedSegment;
use asr_stream_server::transcription::StubRecognizerFactory;
use asr_stream_server::transport::{raw, websocket};
use asr_stream_server::{
    AppConfig, AppState, OnlineRecognizer, ProtocolMessage, RecognizerFactory, RecognizerHandle,
    StreamContext,
};
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Recognizer that replays a fixed list of `process_iter` results.
pub struct ScriptedRecognizer {
    script: VecDeque<Option<RecognizedSegment>>,
    final_segment: Option<RecognizedSegment>,
}

impl OnlineRecognizer for ScriptedRecognizer {
    fn init(&mut self) {}

    fn insert_audio_chunk(&mut self, _samples: &[f32]) {}

    fn process_iter(&mut self) -> Option<RecognizedSegment> {
        self.script.pop_front().flatten()
    }

    fn finish(&mut self) -> Option<RecognizedSegment> {
        self.final_segment.take()
    }
}

pub struct ScriptedFactory {
    pub script: Vec<Option<RecognizedSegment>>,
    pub final_segment: Option<RecognizedSegment>,
}

impl RecognizerFactory for ScriptedFactory {
    fn name(&self) -> &str {
        "scripted"
    }

    fn create(&self) -> Box<dyn OnlineRecognizer> {
        Box::new(ScriptedRecognizer {
            script: self.script.iter().cloned().collect(),
            final_segment: self.final_segment.clone(),
        })
    }
}

pub fn stub_recognizer() -> RecognizerHandle {
    RecognizerHandle::new(StubRecognizerFactory::new(16000, "speech"))
}

/// `samples` PCM16 samples of a constant, clearly non-silent level.
pub fn loud_pcm(samples: usize) -> Vec<u8> {
    std::iter::repeat(8000i16.to_le_bytes())
        .take(samples)
        .flatten()
        .collect()
}

pub async fn spawn_websocket(config: AppConfig, recognizer: RecognizerHandle) -> (SocketAddr, AppState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::new(config);
    tokio::spawn(websocket::serve(listener, StreamContext::new(state.clone(), recognizer)));
    (addr, state)
}

pub async fn spawn_raw(config: AppConfig, recognizer: RecognizerHandle) -> (SocketAddr, AppState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::new(config);
    tokio::spawn(raw::serve(listener, StreamContext::new(state.clone(), recognizer)));
    (addr, state)
}

pub async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
        .await
        .unwrap();
    client
}

/// Next protocol message from the server, skipping pings.
pub async fn next_message(client: &mut Client) -> ProtocolMessage {
    loop {
        let received = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a message");
        match received {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            other => panic!("unexpected websocket event: {:?}", other),
        }
    }
}

pub fn command(name: &str) -> Message {
    Message::Text(format!(r#"{{"command": "{}"}}"#, name))
}

//! # ASR Stream Server
//!
//! Streams audio from websocket or raw TCP peers into an incremental speech
//! recognizer and streams timestamped transcripts back.
//!
//! ## Layout:
//! - **protocol**: wire messages and transcript segments
//! - **audio**: PCM frame decoding and flush-threshold buffering
//! - **transcription**: recognizer interface, factory and stub backend
//! - **session**: per-connection state machine
//! - **transport**: websocket and raw TCP listeners
//! - **health / handlers / middleware / state**: HTTP admin API

pub mod audio;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transcription;
pub mod transport;

pub use config::AppConfig;
pub use error::{AppError, StreamError};
pub use protocol::{ControlCommand, ControlMessage, ProtocolMessage, ResponseType};
pub use session::{InboundFrame, SessionProcessor, SessionState};
pub use state::AppState;
pub use transcription::{OnlineRecognizer, RecognizerFactory, RecognizerHandle};
pub use transport::StreamContext;

use actix_web::web;

/// Admin API routes, shared by the server and its tests.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .route("/config", web::get().to(handlers::get_config))
            .route("/config", web::put().to(handlers::update_config)),
    )
    .route("/health", web::get().to(health::health_check));
}

//! # Transcription Module
//!
//! Bridges the streaming sessions to the incremental recognizer.
//!
//! ## Key Components:
//! - **Recognizer interface**: the four blocking calls a session makes
//! - **Factory**: one recognizer instance per session, chosen by
//!   `recognizer.backend` in the configuration
//! - **Stub backend**: deterministic recognizer used when no model is wired in
//! - **Warm-up**: optional startup pass over a WAV file

pub mod engine;
pub mod stub;
pub mod warmup;

pub use engine::{OnlineRecognizer, RecognizerFactory, RecognizerHandle};
pub use stub::{StubRecognizer, StubRecognizerFactory};

use crate::config::AppConfig;
use anyhow::{anyhow, Result};

/// Backend names accepted in `recognizer.backend`.
pub const KNOWN_BACKENDS: &[&str] = &["stub"];

pub fn is_known_backend(name: &str) -> bool {
    KNOWN_BACKENDS.contains(&name)
}

/// Build the recognizer factory selected by the configuration.
pub fn build_recognizer(config: &AppConfig) -> Result<RecognizerHandle> {
    match config.recognizer.backend.as_str() {
        "stub" => Ok(RecognizerHandle::new(StubRecognizerFactory::new(
            config.audio.sample_rate,
            config.recognizer.stub_text.clone(),
        ))),
        other => Err(anyhow!("Unknown recognizer backend '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_default_recognizer() {
        let handle = build_recognizer(&AppConfig::default()).unwrap();
        assert_eq!(handle.name(), "stub");
    }

    #[test]
    fn test_unknown_backend() {
        let mut config = AppConfig::default();
        config.recognizer.backend = "kaldi".to_string();
        assert!(!is_known_backend("kaldi"));
        assert!(build_recognizer(&config).is_err());
    }
}

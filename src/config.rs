//! # Configuration Management
//!
//! Loads the server configuration from several sources, highest priority last:
//! 1. Built-in defaults (`AppConfig::default()`)
//! 2. `config.toml` in the working directory (optional)
//! 3. Environment variables with the `APP_` prefix, `__` between nesting
//!    levels (e.g. `APP_AUDIO__MIN_CHUNK_SECONDS=0.5`)
//! 4. `HOST` / `PORT`, as set by most deployment platforms
//!
//! The HTTP admin API can patch the configuration at runtime; streaming
//! sessions read it once when they are created, so a change only affects
//! connections accepted afterwards.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Top-level configuration, one struct per concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub streaming: StreamingConfig,
    pub audio: AudioConfig,
    pub recognizer: RecognizerConfig,
    pub performance: PerformanceConfig,
}

/// HTTP admin API binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// How a raw TCP stream marks chunk and stream boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawFraming {
    /// Unframed byte stream ended by the literal bytes `END`.
    Terminator,
    /// Big-endian `u32` length before every chunk, zero length ends the stream.
    LengthPrefixed,
}

/// Streaming listeners. Both share `server.host`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Websocket listener port
    pub websocket_port: u16,

    /// Whether the raw TCP listener is started at all
    pub raw_enabled: bool,

    /// Raw TCP listener port
    pub raw_port: u16,

    pub raw_framing: RawFraming,

    /// Capacity of the per-session outbound message queue
    pub outbound_queue: usize,
}

/// Audio format accepted from peers and the flush threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Sample encoding, soundfile-style naming (`PCM_16`)
    pub subtype: String,
    /// Minimum buffered audio, in seconds, before the recognizer runs again
    pub min_chunk_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizerConfig {
    /// Recognizer backend name, see `transcription::KNOWN_BACKENDS`
    pub backend: String,

    /// WAV file pushed through a throw-away recognizer at startup
    #[serde(default)]
    pub warmup_file: Option<String>,

    /// Text the stub backend puts in front of every segment
    pub stub_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            streaming: StreamingConfig {
                websocket_port: 43007,
                raw_enabled: true,
                raw_port: 43008,
                raw_framing: RawFraming::Terminator,
                outbound_queue: 64,
            },
            audio: AudioConfig {
                sample_rate: 16000,
                channels: 1,
                subtype: "PCM_16".to_string(),
                min_chunk_seconds: 1.0,
            },
            recognizer: RecognizerConfig {
                backend: "stub".to_string(),
                warmup_file: None,
                stub_text: "speech".to_string(),
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings
            .build()
            .context("failed to assemble configuration sources")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;
        Ok(config)
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("Server port cannot be 0"));
        }

        if self.streaming.websocket_port == 0 {
            return Err(anyhow!("Websocket port cannot be 0"));
        }

        if self.streaming.websocket_port == self.server.port {
            return Err(anyhow!("Websocket port must differ from the HTTP port"));
        }

        if self.streaming.raw_enabled {
            if self.streaming.raw_port == 0 {
                return Err(anyhow!("Raw socket port cannot be 0"));
            }
            if self.streaming.raw_port == self.server.port
                || self.streaming.raw_port == self.streaming.websocket_port
            {
                return Err(anyhow!("Raw socket port must differ from the other listeners"));
            }
        }

        if self.streaming.outbound_queue == 0 {
            return Err(anyhow!("Outbound queue capacity must be greater than 0"));
        }

        if !(self.audio.min_chunk_seconds > 0.0 && self.audio.min_chunk_seconds.is_finite()) {
            return Err(anyhow!("min_chunk_seconds must be a positive number"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow!("Sample rate cannot be 0"));
        }

        // Frames are decoded as-is, no resampling or downmixing.
        if self.audio.channels != 1 {
            return Err(anyhow!("Only mono audio is supported"));
        }

        if self.audio.subtype != crate::audio::decoder::SUPPORTED_SUBTYPE {
            return Err(anyhow!(
                "Unsupported audio subtype '{}', expected {}",
                self.audio.subtype,
                crate::audio::decoder::SUPPORTED_SUBTYPE
            ));
        }

        if !crate::transcription::is_known_backend(&self.recognizer.backend) {
            return Err(anyhow!(
                "Unknown recognizer backend '{}' (known: {})",
                self.recognizer.backend,
                crate::transcription::KNOWN_BACKENDS.join(", ")
            ));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow!("Max concurrent sessions must be greater than 0"));
        }

        Ok(())
    }

    /// Apply a partial JSON document on top of this configuration.
    ///
    /// Only the keys present in `json_str` change, e.g.
    /// `{"audio": {"min_chunk_seconds": 0.5}}`. The result is validated and
    /// `self` is left untouched when anything fails.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let patch: serde_json::Value = serde_json::from_str(json_str)?;
        if !patch.is_object() {
            return Err(anyhow!("Configuration update must be a JSON object"));
        }

        let mut current = serde_json::to_value(&*self)?;
        merge_json(&mut current, patch);

        let updated: AppConfig = serde_json::from_value(current)
            .context("configuration update has the wrong shape")?;
        updated.validate()?;

        *self = updated;
        Ok(())
    }

    /// Address of the HTTP admin API.
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn websocket_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.streaming.websocket_port)
    }

    pub fn raw_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.streaming.raw_port)
    }
}

fn merge_json(target: &mut serde_json::Value, patch: serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

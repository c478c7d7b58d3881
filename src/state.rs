//! # Application State Management
//!
//! State shared by the HTTP admin API and every streaming connection:
//! the live configuration, process-wide counters and the start time.
//!
//! ## What is NOT here:
//! Per-session state. Buffers, recognizers and trace ids belong to the
//! session that owns them and are never shared; this module only counts.
//!
//! ## Locking:
//! `parking_lot::RwLock` around the config and metrics. Critical sections are
//! a handful of integer updates, never held across an `.await`.

use crate::config::AppConfig;
use crate::protocol::ProtocolMessage;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state, cheap to clone.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Live configuration, updatable through `PUT /api/v1/config`
    pub config: Arc<RwLock<AppConfig>>,

    pub metrics: Arc<RwLock<AppMetrics>>,

    pub start_time: Instant,
}

/// Counters for the whole process.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// HTTP requests handled by the admin API
    pub request_count: u64,

    /// HTTP requests that ended in a 4xx/5xx
    pub error_count: u64,

    /// Per-endpoint HTTP statistics, keyed by `"METHOD /path"`
    pub endpoint_metrics: HashMap<String, EndpointMetric>,

    /// Streaming sessions currently open
    pub active_sessions: u32,

    /// Streaming sessions accepted since startup
    pub total_sessions: u64,

    /// Connections turned away because the session limit was reached
    pub rejected_sessions: u64,

    pub audio_bytes_received: u64,

    pub results_emitted: u64,

    /// ERROR messages sent to peers
    pub errors_emitted: u64,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration; the lock is released immediately.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        *self.config.write() = new_config;
        Ok(())
    }

    pub fn increment_request_count(&self) {
        self.metrics.write().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics.write().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Reserve a streaming session slot.
    ///
    /// Returns `None` when `performance.max_concurrent_sessions` sessions are
    /// already open. The slot is released when the guard is dropped.
    pub fn try_open_session(&self) -> Option<SessionGuard> {
        let limit = self.config.read().performance.max_concurrent_sessions;
        let mut metrics = self.metrics.write();

        if metrics.active_sessions as usize >= limit {
            metrics.rejected_sessions += 1;
            return None;
        }

        metrics.active_sessions += 1;
        metrics.total_sessions += 1;
        Some(SessionGuard {
            metrics: Arc::clone(&self.metrics),
        })
    }

    pub fn record_audio_bytes(&self, bytes: usize) {
        self.metrics.write().audio_bytes_received += bytes as u64;
    }

    /// Count an outbound message by kind.
    pub fn record_message(&self, message: &ProtocolMessage) {
        match message {
            ProtocolMessage::Result { .. } => self.metrics.write().results_emitted += 1,
            ProtocolMessage::Error { .. } => self.metrics.write().errors_emitted += 1,
            _ => {}
        }
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Holds one streaming session slot; releases it on drop.
#[derive(Debug)]
pub struct SessionGuard {
    metrics: Arc<RwLock<AppMetrics>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut metrics = self.metrics.write();
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

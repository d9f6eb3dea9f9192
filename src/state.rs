//! # Application State
//!
//! Shared by every HTTP handler and WebSocket connection:
//!
//! - `config`: runtime configuration; `PUT /api/v1/config` edits it and the
//!   next session start picks the change up
//! - `metrics`: pipeline counters updated by the session task
//! - `sessions`: the single-session controller
//! - `events`: broadcast channel every session event is published on
//! - `pipeline`: the fitted artifacts, loaded once at startup
//!
//! ## Key Rust Concepts:
//!
//! ### Arc + atomics instead of Arc<RwLock<Metrics>>
//! - **AtomicU64**: each counter is updated with `fetch_add`, no lock taken
//! - **Ordering::Relaxed**: counters are independent, so no cross-counter ordering is needed
//! - **Mutex<Option<PredictionResult>>**: the one non-numeric value; held only for a clone
//!
//! ### Poisoned locks
//! - A panic while holding a `std::sync` lock poisons it
//! - `PoisonError::into_inner` recovers the guard; the config is plain data, so it stays usable
//!
//! Counters are atomics so the ingest loop never waits on a lock to account
//! for a read.

use crate::audio::session::SessionController;
use crate::config::AppConfig;
use crate::events::{EventSink, SessionEvent};
use crate::inference::{EmotionPipeline, PredictionResult};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::broadcast;

/// Events buffered per WebSocket subscriber before it starts lagging.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub metrics: Arc<StreamMetrics>,
    pub sessions: Arc<SessionController>,
    pub events: broadcast::Sender<SessionEvent>,
    pub pipeline: Arc<EmotionPipeline>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, pipeline: Arc<EmotionPipeline>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let metrics = Arc::new(StreamMetrics::default());
        let sink: Arc<dyn EventSink> = Arc::new(events.clone());
        let sessions = Arc::new(SessionController::new(
            Arc::clone(&pipeline),
            sink,
            Arc::clone(&metrics),
        ));

        Self {
            config: Arc::new(RwLock::new(config)),
            metrics,
            sessions,
            events,
            pipeline,
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration; the lock is released immediately.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> anyhow::Result<()> {
        new_config.validate()?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = new_config;
        Ok(())
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

/// Counters across all sessions since startup.
#[derive(Debug, Default)]
pub struct StreamMetrics {
    sessions_started: AtomicU64,
    bytes_received: AtomicU64,
    samples_decoded: AtomicU64,
    dropped_bytes: AtomicU64,
    decode_errors: AtomicU64,
    windows_completed: AtomicU64,
    dropped_windows: AtomicU64,
    predictions: AtomicU64,
    inference_failures: AtomicU64,
    total_inference_ms: AtomicU64,
    last_prediction: Mutex<Option<PredictionResult>>,
}

impl StreamMetrics {
    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self, bytes: usize, samples: usize, dropped_bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        self.samples_decoded.fetch_add(samples as u64, Ordering::Relaxed);
        self.dropped_bytes.fetch_add(dropped_bytes as u64, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window(&self) {
        self.windows_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_window(&self) {
        self.dropped_windows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prediction(&self, result: &PredictionResult) {
        self.predictions.fetch_add(1, Ordering::Relaxed);
        self.total_inference_ms
            .fetch_add(result.processing_time_ms, Ordering::Relaxed);
        *self
            .last_prediction
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(result.clone());
    }

    pub fn record_inference_failure(&self) {
        self.inference_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_prediction(&self) -> Option<PredictionResult> {
        self.last_prediction
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let predictions = self.predictions.load(Ordering::Relaxed);
        let total_ms = self.total_inference_ms.load(Ordering::Relaxed);

        MetricsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            samples_decoded: self.samples_decoded.load(Ordering::Relaxed),
            dropped_bytes: self.dropped_bytes.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            windows_completed: self.windows_completed.load(Ordering::Relaxed),
            dropped_windows: self.dropped_windows.load(Ordering::Relaxed),
            predictions,
            inference_failures: self.inference_failures.load(Ordering::Relaxed),
            average_inference_ms: if predictions > 0 {
                total_ms as f64 / predictions as f64
            } else {
                0.0
            },
            last_prediction: self.last_prediction(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub sessions_started: u64,
    pub bytes_received: u64,
    pub samples_decoded: u64,
    pub dropped_bytes: u64,
    pub decode_errors: u64,
    pub windows_completed: u64,
    pub dropped_windows: u64,
    pub predictions: u64,
    pub inference_failures: u64,
    pub average_inference_ms: f64,
    pub last_prediction: Option<PredictionResult>,
}

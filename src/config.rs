//! # Configuration Management
//!
//! Loads the service configuration from, in priority order (highest first):
//! 1. Environment variables (`APP_STREAM__HOST`, `APP_AUDIO__SAMPLE_RATE`, ...)
//!    plus the platform-style `HOST` / `PORT` overrides for the HTTP listener
//! 2. `config.toml` in the working directory (optional)
//! 3. Built-in defaults (the `Default` impl)
//!
//! Nothing about the recording device, the window length or the label order is
//! hidden in the pipeline code: every such value is read from here.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;

/// Highest accepted device sample rate.
pub const MAX_SAMPLE_RATE: u32 = 192_000;
/// Longest accepted analysis window, in seconds.
pub const MAX_PREDICT_INTERVAL_SECONDS: u32 = 60;
/// Longest accepted session recording, in seconds.
pub const MAX_RECORDING_SECONDS: u32 = 3600;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub stream: StreamConfig,
    pub audio: AudioConfig,
    pub features: FeatureConfig,
    pub inference: InferenceConfig,
    pub recording: RecordingConfig,
}

/// HTTP control/event server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// What to do with trailing bytes of a read that do not form a whole sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemainderPolicy {
    /// Keep the partial sample and complete it with the next read
    Carry,
    /// Discard the partial sample (alignment is lost if the sender split a sample)
    Drop,
}

impl std::str::FromStr for RemainderPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "carry" => Ok(RemainderPolicy::Carry),
            "drop" => Ok(RemainderPolicy::Drop),
            _ => Err(anyhow!("Unknown remainder policy: {}", s)),
        }
    }
}

/// Connection to the recording device and ingest loop pacing.
///
/// ## Fields:
/// - `host` / `port`: where the device serves its raw PCM stream
/// - `connect_timeout_ms`: upper bound for the TCP handshake
/// - `tick_interval_ms`: period of the ingest loop (100ms in the reference client)
/// - `read_chunk_bytes`: size of one socket read
/// - `max_reads_per_tick`: how many reads a single tick may drain when data is queued
/// - `waveform_samples`: length of the waveform tail published on every tick with data
/// - `remainder_policy`: see [`RemainderPolicy`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub tick_interval_ms: u64,
    pub read_chunk_bytes: usize,
    pub max_reads_per_tick: usize,
    pub waveform_samples: usize,
    pub remainder_policy: RemainderPolicy,
}

/// Sample format and window length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Samples per second sent by the device (mono, i32 little-endian)
    pub sample_rate: u32,
    /// Seconds of audio per analysis window
    pub predict_interval_seconds: u32,
}

impl AudioConfig {
    /// Window size `W = sample_rate × predict_interval_seconds`.
    ///
    /// Saturates instead of overflowing; `AppConfig::validate` bounds both
    /// factors so a validated config never gets near the limit.
    pub fn window_samples(&self) -> usize {
        self.checked_window_samples().unwrap_or(usize::MAX)
    }

    pub fn checked_window_samples(&self) -> Option<usize> {
        (self.sample_rate as usize).checked_mul(self.predict_interval_seconds as usize)
    }
}

/// Short-time descriptor parameters. Changing any of these changes the
/// feature distribution the scaler and classifier were fitted on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub n_fft: usize,
    pub hop_length: usize,
    /// Frame length for zero-crossing rate and RMS
    pub frame_length: usize,
    pub n_mels: usize,
    pub n_chroma: usize,
    pub fmin: f64,
    /// Upper mel edge; Nyquist when absent
    pub fmax: Option<f64>,
    /// Fixed chroma tuning in fractions of a bin; estimated per window when absent
    pub chroma_tuning: Option<f64>,
}

impl FeatureConfig {
    /// `[zcr (1), chroma (n_chroma), rms (1), mel (n_mels)]`
    pub fn feature_len(&self) -> usize {
        1 + self.n_chroma + 1 + self.n_mels
    }
}

/// Compute device for the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    Auto,
    Cpu,
    Cuda,
    Metal,
}

/// Where inference runs relative to the ingest loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceMode {
    /// Inside the tick that completed the window; the next tick waits for it
    Inline,
    /// On a dedicated worker with a one-window mailbox (drop-oldest)
    Worker,
}

/// Layer layout of the 1-D CNN stored in `model_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchitectureConfig {
    pub conv_filters: Vec<usize>,
    pub kernel_size: usize,
    pub pool_size: usize,
    pub dense_units: Vec<usize>,
}

/// Fitted artifacts and the label set they were trained against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub scaler_path: PathBuf,
    pub model_path: PathBuf,
    /// Label order must match the model's output order
    pub labels: Vec<String>,
    pub expected_features: usize,
    pub device: DevicePreference,
    pub mode: InferenceMode,
    pub architecture: ArchitectureConfig,
}

/// Optional WAV capture of every streaming session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    /// Samples beyond this duration are not recorded
    pub max_seconds: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            stream: StreamConfig {
                host: "192.168.137.89".to_string(),
                port: 8888,
                connect_timeout_ms: 5000,
                tick_interval_ms: 100,
                read_chunk_bytes: 4096,
                max_reads_per_tick: 16,
                waveform_samples: 512,
                remainder_policy: RemainderPolicy::Carry,
            },
            audio: AudioConfig {
                sample_rate: 16000,
                predict_interval_seconds: 2,
            },
            features: FeatureConfig {
                n_fft: 2048,
                hop_length: 512,
                frame_length: 2048,
                n_mels: 128,
                n_chroma: 12,
                fmin: 0.0,
                fmax: None,
                chroma_tuning: None,
            },
            inference: InferenceConfig {
                scaler_path: PathBuf::from("models/scaler.json"),
                model_path: PathBuf::from("models/emotion_cnn1d.safetensors"),
                labels: vec!["Happy".to_string(), "Neutral".to_string()],
                expected_features: 142,
                device: DevicePreference::Cpu,
                mode: InferenceMode::Inline,
                architecture: ArchitectureConfig {
                    conv_filters: vec![64, 128],
                    kernel_size: 5,
                    pool_size: 2,
                    dense_units: vec![64],
                },
            },
            recording: RecordingConfig {
                enabled: false,
                directory: PathBuf::from("recordings"),
                max_seconds: 600,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_STREAM__HOST=192.168.1.40`: recording device address
    /// - `APP_AUDIO__PREDICT_INTERVAL_SECONDS=3`: longer windows
    /// - `APP_INFERENCE__LABELS=Happy,Neutral,Sad`: label order of a retrained model
    /// - `HOST` / `PORT`: HTTP listener, for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("inference.labels")
                    .with_list_parse_key("inference.architecture.conv_filters")
                    .with_list_parse_key("inference.architecture.dense_units")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations that would fail later in a less obvious way.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("Server port cannot be 0"));
        }

        if self.stream.host.trim().is_empty() {
            return Err(anyhow!("Stream host cannot be empty"));
        }

        if self.stream.port == 0 {
            return Err(anyhow!("Stream port cannot be 0"));
        }

        if self.stream.tick_interval_ms == 0 {
            return Err(anyhow!("Tick interval must be greater than 0"));
        }

        if self.stream.read_chunk_bytes == 0 || self.stream.read_chunk_bytes % 4 != 0 {
            return Err(anyhow!(
                "Read chunk size must be a positive multiple of 4 bytes, got {}",
                self.stream.read_chunk_bytes
            ));
        }

        if self.stream.max_reads_per_tick == 0 {
            return Err(anyhow!("Max reads per tick must be greater than 0"));
        }

        if self.audio.sample_rate == 0 || self.audio.sample_rate > MAX_SAMPLE_RATE {
            return Err(anyhow!(
                "Sample rate must be between 1 and {} Hz, got {}",
                MAX_SAMPLE_RATE,
                self.audio.sample_rate
            ));
        }

        if self.audio.predict_interval_seconds == 0
            || self.audio.predict_interval_seconds > MAX_PREDICT_INTERVAL_SECONDS
        {
            return Err(anyhow!(
                "Predict interval must be between 1 and {} seconds, got {}",
                MAX_PREDICT_INTERVAL_SECONDS,
                self.audio.predict_interval_seconds
            ));
        }

        // The window buffer is allocated up front at session start.
        if self.audio.checked_window_samples().is_none() {
            return Err(anyhow!("Analysis window size overflows"));
        }

        if self.recording.max_seconds > MAX_RECORDING_SECONDS {
            return Err(anyhow!(
                "Recording limit must be at most {} seconds, got {}",
                MAX_RECORDING_SECONDS,
                self.recording.max_seconds
            ));
        }

        if self.features.n_fft == 0 || self.features.n_fft % 2 != 0 {
            return Err(anyhow!("n_fft must be a positive even number"));
        }

        if self.features.hop_length == 0 || self.features.frame_length == 0 {
            return Err(anyhow!("Hop and frame lengths must be greater than 0"));
        }

        if self.features.n_mels == 0 || self.features.n_chroma == 0 {
            return Err(anyhow!("Mel and chroma band counts must be greater than 0"));
        }

        let nyquist = self.audio.sample_rate as f64 / 2.0;
        let fmax = self.features.fmax.unwrap_or(nyquist);
        if self.features.fmin < 0.0 || fmax <= self.features.fmin || fmax > nyquist {
            return Err(anyhow!(
                "Mel range must satisfy 0 <= fmin < fmax <= {} Hz",
                nyquist
            ));
        }

        // A layout drift here would silently feed garbage through the scaler.
        if self.features.feature_len() != self.inference.expected_features {
            return Err(anyhow!(
                "Feature layout produces {} values but the artifacts expect {}",
                self.features.feature_len(),
                self.inference.expected_features
            ));
        }

        if self.inference.labels.len() < 2 {
            return Err(anyhow!("At least two labels are required"));
        }

        let unique: HashSet<&str> = self.inference.labels.iter().map(String::as_str).collect();
        if unique.len() != self.inference.labels.len() {
            return Err(anyhow!("Labels must be unique"));
        }

        let arch = &self.inference.architecture;
        if arch.kernel_size == 0 || arch.pool_size == 0 {
            return Err(anyhow!("Kernel and pool sizes must be greater than 0"));
        }

        // Symmetric `k / 2` padding only reproduces "same" convolution for odd kernels.
        if arch.kernel_size % 2 == 0 {
            return Err(anyhow!(
                "Kernel size must be odd, got {}",
                arch.kernel_size
            ));
        }

        Ok(())
    }

    /// Apply a partial JSON update, e.g. `{"stream": {"host": "10.0.0.5"}}`.
    ///
    /// Only settings that take effect on the next session start can change at
    /// runtime. Artifact paths, labels and feature parameters are bound to the
    /// pipeline loaded at startup and are rejected here.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if partial_config.get("features").is_some() || partial_config.get("inference").is_some() {
            return Err(anyhow!(
                "Feature and inference settings are fixed at startup; restart to change them"
            ));
        }

        if partial_config.get("server").is_some() {
            return Err(anyhow!(
                "The HTTP listener is bound at startup; restart to change server settings"
            ));
        }

        if let Some(stream) = partial_config.get("stream") {
            if let Some(host) = stream.get("host").and_then(|v| v.as_str()) {
                self.stream.host = host.to_string();
            }
            if let Some(port) = stream.get("port").and_then(|v| v.as_u64()) {
                self.stream.port = u16::try_from(port)?;
            }
            if let Some(timeout) = stream.get("connect_timeout_ms").and_then(|v| v.as_u64()) {
                self.stream.connect_timeout_ms = timeout;
            }
            if let Some(tick) = stream.get("tick_interval_ms").and_then(|v| v.as_u64()) {
                self.stream.tick_interval_ms = tick;
            }
            if let Some(waveform) = stream.get("waveform_samples").and_then(|v| v.as_u64()) {
                self.stream.waveform_samples = waveform as usize;
            }
            if let Some(policy) = stream.get("remainder_policy").and_then(|v| v.as_str()) {
                self.stream.remainder_policy = policy.parse()?;
            }
        }

        if let Some(audio) = partial_config.get("audio") {
            if let Some(interval) = audio.get("predict_interval_seconds").and_then(|v| v.as_u64()) {
                self.audio.predict_interval_seconds = u32::try_from(interval)?;
            }
            if audio.get("sample_rate").is_some() {
                return Err(anyhow!("Sample rate is fixed at startup; restart to change it"));
            }
        }

        if let Some(recording) = partial_config.get("recording") {
            if let Some(enabled) = recording.get("enabled").and_then(|v| v.as_bool()) {
                self.recording.enabled = enabled;
            }
            if let Some(directory) = recording.get("directory").and_then(|v| v.as_str()) {
                self.recording.directory = PathBuf::from(directory);
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.stream.port, 8888);
        assert_eq!(config.audio.window_samples(), 32000);
        assert_eq!(config.features.feature_len(), 142);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_feature_layout_drift_is_rejected() {
        let mut config = AppConfig::default();
        config.features.n_mels = 40;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_read_chunk_must_be_sample_aligned() {
        let mut config = AppConfig::default();
        config.stream.read_chunk_bytes = 4094;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_labels_are_rejected() {
        let mut config = AppConfig::default();
        config.inference.labels = vec!["Happy".to_string(), "Happy".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"stream": {"host": "10.0.0.5", "port": 9999, "remainder_policy": "drop"}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.stream.host, "10.0.0.5");
        assert_eq!(config.stream.port, 9999);
        assert_eq!(config.stream.remainder_policy, RemainderPolicy::Drop);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_startup_only_settings_cannot_change() {
        let mut config = AppConfig::default();
        assert!(config.update_from_json(r#"{"inference": {"labels": ["A", "B"]}}"#).is_err());
        assert!(config.update_from_json(r#"{"audio": {"sample_rate": 8000}}"#).is_err());
        assert_eq!(config.audio.sample_rate, 16000);
        assert!(config.update_from_json(r#"{"server": {"port": 9090}}"#).is_err());
        assert!(config.update_from_json(r#"{"server": {"host": "0.0.0.0"}}"#).is_err());
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_oversized_window_is_rejected() {
        let mut config = AppConfig::default();
        let json = r#"{"audio": {"predict_interval_seconds": 4000000000}}"#;
        assert!(config.update_from_json(json).is_err());

        let mut config = AppConfig::default();
        config.audio.predict_interval_seconds = MAX_PREDICT_INTERVAL_SECONDS + 1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.sample_rate = MAX_SAMPLE_RATE + 1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.predict_interval_seconds = MAX_PREDICT_INTERVAL_SECONDS;
        assert!(config.validate().is_ok());
        assert_eq!(config.audio.window_samples(), 16000 * 60);
    }

    #[test]
    fn test_recording_limit_is_bounded() {
        let mut config = AppConfig::default();
        config.recording.max_seconds = MAX_RECORDING_SECONDS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_even_kernel_size_is_rejected() {
        let mut config = AppConfig::default();
        config.inference.architecture.kernel_size = 4;
        assert!(config.validate().is_err());

        config.inference.architecture.kernel_size = 5;
        assert!(config.validate().is_ok());
    }
}

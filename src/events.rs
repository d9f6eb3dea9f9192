//! # Session Events
//!
//! Everything a streaming session reports to the outside world. Events are
//! serialized as tagged JSON for WebSocket clients:
//!
//! ```json
//! {"type": "prediction", "session_id": "...", "result": {"label": "Happy", ...}}
//! {"type": "state_changed", "session_id": "...", "state": {"state": "failed", "kind": "io_error", "reason": "..."}}
//! ```

use crate::audio::decoder::Sample;
use crate::error::StreamError;
use crate::inference::PredictionResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Stopped,
    Failed { kind: String, reason: String },
}

impl SessionState {
    pub fn failed(err: &StreamError) -> Self {
        SessionState::Failed {
            kind: err.code().to_string(),
            reason: err.to_string(),
        }
    }

    /// A session in this state owns a connection (or is opening one).
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Streaming)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Streaming => "streaming",
            SessionState::Stopped => "stopped",
            SessionState::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Latest raw samples, published on every tick that received data
    Waveform {
        session_id: String,
        samples: Vec<Sample>,
    },
    Prediction {
        session_id: String,
        result: PredictionResult,
    },
    StateChanged {
        session_id: String,
        state: SessionState,
        timestamp: DateTime<Utc>,
    },
}

impl SessionEvent {
    pub fn state_changed(session_id: &str, state: SessionState) -> Self {
        SessionEvent::StateChanged {
            session_id: session_id.to_string(),
            state,
            timestamp: Utc::now(),
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::Waveform { session_id, .. }
            | SessionEvent::Prediction { session_id, .. }
            | SessionEvent::StateChanged { session_id, .. } => session_id,
        }
    }
}

/// Consumer of session events. Emitting never blocks the ingest loop.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: SessionEvent);
}

/// Fan-out to WebSocket clients. Having no subscriber is not an error.
impl EventSink for broadcast::Sender<SessionEvent> {
    fn emit(&self, event: SessionEvent) {
        let _ = self.send(event);
    }
}

impl EventSink for mpsc::UnboundedSender<SessionEvent> {
    fn emit(&self, event: SessionEvent) {
        let _ = self.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_state_carries_error_code() {
        let state = SessionState::failed(&StreamError::Connect("refused".to_string()));
        assert_eq!(state.name(), "failed");
        assert!(!state.is_active());

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["kind"], "connect_error");
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = SessionEvent::Waveform {
            session_id: "abc".to_string(),
            samples: vec![1, -2],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "waveform");
        assert_eq!(json["samples"], serde_json::json!([1, -2]));

        let event = SessionEvent::state_changed("abc", SessionState::Streaming);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "state_changed");
        assert_eq!(json["state"]["state"], "streaming");
        assert_eq!(event.session_id(), "abc");
    }
}

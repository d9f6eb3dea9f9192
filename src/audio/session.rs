//! # Streaming Session
//!
//! A [`StreamSession`] owns one TCP connection to the recording device and
//! everything derived from it: the sample decoder, the current window, the
//! waveform tail and (optionally) the WAV recorder. It runs as a single tokio
//! task driven by a periodic tick.
//!
//! ## State machine:
//! ```text
//! Idle → Connecting → Streaming → Stopped → Idle
//!             │            │
//!             └──→ Failed ←┘ → Idle
//! ```
//!
//! ## One tick:
//! 1. wait at most one tick interval for the socket to have data
//! 2. drain up to `max_reads_per_tick` reads that are already queued
//! 3. decode → window → waveform tail (+ recording), publish the waveform
//! 4. if the window is full: drain it and classify it (inline) or hand it to
//!    the inference worker
//!
//! A stop request is raced against every socket wait, so an in-flight read is
//! abandoned and the socket shut down rather than waited out. A partial window
//! is discarded when the session ends.
//!
//! [`SessionController`] enforces that at most one session streams at a time.

use crate::audio::buffer::{WaveformTail, WindowBuffer};
use crate::audio::decoder::{Sample, SampleDecoder};
use crate::audio::recorder::WavRecorder;
use crate::config::{AppConfig, InferenceMode, RemainderPolicy};
use crate::error::{AppError, StreamError};
use crate::events::{EventSink, SessionEvent, SessionState};
use crate::inference::worker::{InferenceOutcome, InferenceWorker};
use crate::inference::EmotionPipeline;
use crate::state::StreamMetrics;
use serde::Serialize;
use std::fmt;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// How a tick ended when the session should keep going or stop cleanly.
enum TickOutcome {
    Continue,
    PeerClosed,
    StopRequested,
}

/// Per-connection state, created once the socket is open.
struct Ingest {
    decoder: SampleDecoder,
    window: WindowBuffer,
    tail: WaveformTail,
    recorder: Option<WavRecorder>,
    worker: Option<InferenceWorker>,
    outcomes: mpsc::UnboundedReceiver<InferenceOutcome>,
    read_buf: Vec<u8>,
}

pub struct StreamSession {
    id: String,
    config: AppConfig,
    pipeline: Arc<EmotionPipeline>,
    sink: Arc<dyn EventSink>,
    metrics: Arc<StreamMetrics>,
    state: watch::Sender<SessionState>,
}

impl StreamSession {
    pub fn new(
        id: String,
        config: AppConfig,
        pipeline: Arc<EmotionPipeline>,
        sink: Arc<dyn EventSink>,
        metrics: Arc<StreamMetrics>,
        state: watch::Sender<SessionState>,
    ) -> Self {
        Self {
            id,
            config,
            pipeline,
            sink,
            metrics,
            state,
        }
    }

    /// Drive the session to completion and return its terminal state.
    ///
    /// The last state published is always `Idle`, right after the terminal one.
    pub async fn run(self, mut stop: watch::Receiver<bool>) -> SessionState {
        self.set_state(SessionState::Connecting);

        let connected = tokio::select! {
            biased;
            _ = stop.wait_for(|stop| *stop) => None,
            result = self.connect() => Some(result),
        };

        let terminal = match connected {
            None => {
                info!(session_id = %self.id, "Stop requested while connecting");
                SessionState::Stopped
            }
            Some(Err(err)) => {
                error!(session_id = %self.id, error = %err, "Could not connect to recording device");
                SessionState::failed(&err)
            }
            Some(Ok(stream)) => {
                self.set_state(SessionState::Streaming);
                self.stream(stream, &mut stop).await
            }
        };

        self.set_state(terminal.clone());
        self.set_state(SessionState::Idle);
        terminal
    }

    fn set_state(&self, state: SessionState) {
        info!(session_id = %self.id, state = state.name(), "Session state changed");
        self.state.send_replace(state.clone());
        self.sink.emit(SessionEvent::state_changed(&self.id, state));
    }

    async fn connect(&self) -> Result<TcpStream, StreamError> {
        let host = self.config.stream.host.as_str();
        let port = self.config.stream.port;
        let limit = Duration::from_millis(self.config.stream.connect_timeout_ms);

        info!(session_id = %self.id, host, port, "Connecting to recording device");
        match timeout(limit, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Could not set TCP_NODELAY: {}", e);
                }
                Ok(stream)
            }
            Ok(Err(e)) => Err(StreamError::Connect(format!("{}:{}: {}", host, port, e))),
            Err(_) => Err(StreamError::Connect(format!(
                "{}:{}: timed out after {} ms",
                host, port, self.config.stream.connect_timeout_ms
            ))),
        }
    }

    /// The `Streaming` state: tick until stopped, closed or failed, then tear down.
    async fn stream(&self, mut stream: TcpStream, stop: &mut watch::Receiver<bool>) -> SessionState {
        let mut ingest = self.open_ingest();
        let mut ticker = interval(Duration::from_millis(self.config.stream.tick_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let terminal = loop {
            tokio::select! {
                biased;
                _ = stop.wait_for(|stop| *stop) => {
                    info!(session_id = %self.id, "Stop requested");
                    break SessionState::Stopped;
                }
                _ = ticker.tick() => {}
            }

            match self.tick(&mut stream, stop, &mut ingest).await {
                Ok(TickOutcome::Continue) => {}
                Ok(TickOutcome::StopRequested) => {
                    info!(session_id = %self.id, "Stop requested");
                    break SessionState::Stopped;
                }
                Ok(TickOutcome::PeerClosed) => {
                    info!(session_id = %self.id, "Recording device closed the connection");
                    break SessionState::Stopped;
                }
                Err(err) => {
                    error!(session_id = %self.id, error = %err, "Session failed");
                    break SessionState::failed(&err);
                }
            }
        };

        if let Err(e) = stream.shutdown().await {
            debug!(session_id = %self.id, "Socket shutdown: {}", e);
        }
        self.close_ingest(ingest).await;
        terminal
    }

    fn open_ingest(&self) -> Ingest {
        let stream_config = &self.config.stream;
        let window_samples = self.config.audio.window_samples();

        let recorder = if self.config.recording.enabled {
            match WavRecorder::create(
                &self.config.recording.directory,
                &self.id,
                self.config.audio.sample_rate,
                self.config.recording.max_seconds,
            ) {
                Ok(recorder) => Some(recorder),
                Err(e) => {
                    warn!(session_id = %self.id, "Recording disabled for this session: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        let (outcome_tx, outcomes) = mpsc::unbounded_channel();
        let worker = match self.config.inference.mode {
            InferenceMode::Inline => None,
            InferenceMode::Worker => Some(InferenceWorker::spawn(
                self.id.clone(),
                Arc::clone(&self.pipeline),
                Arc::clone(&self.sink),
                outcome_tx,
            )),
        };

        debug!(
            session_id = %self.id,
            window_samples,
            mode = ?self.config.inference.mode,
            recording = recorder.is_some(),
            "Ingest ready"
        );

        Ingest {
            decoder: SampleDecoder::new(stream_config.remainder_policy),
            window: WindowBuffer::new(window_samples),
            tail: WaveformTail::new(stream_config.waveform_samples),
            recorder,
            worker,
            outcomes,
            read_buf: vec![0u8; stream_config.read_chunk_bytes],
        }
    }

    async fn close_ingest(&self, mut ingest: Ingest) {
        let discarded = ingest.window.discard();
        if discarded > 0 {
            debug!(session_id = %self.id, samples = discarded, "Discarded partial window");
        }
        ingest.decoder.reset();
        ingest.tail.clear();

        if let Some(worker) = ingest.worker.take() {
            worker.shutdown().await;
        }
        while let Ok(outcome) = ingest.outcomes.try_recv() {
            self.account(outcome);
        }

        if let Some(recorder) = ingest.recorder.take() {
            match tokio::task::spawn_blocking(move || recorder.finish()).await {
                Ok(Ok(path)) => debug!(session_id = %self.id, path = %path.display(), "Recording closed"),
                Ok(Err(e)) => warn!(session_id = %self.id, "Recording not saved: {:#}", e),
                Err(e) => warn!(session_id = %self.id, "Recording task failed: {}", e),
            }
        }
    }

    async fn tick(
        &self,
        stream: &mut TcpStream,
        stop: &mut watch::Receiver<bool>,
        ingest: &mut Ingest,
    ) -> Result<TickOutcome, StreamError> {
        // A fatal error on the worker fails the session one tick later.
        while let Ok(outcome) = ingest.outcomes.try_recv() {
            if let Some(err) = self.account(outcome) {
                return Err(err);
            }
        }

        let wait = Duration::from_millis(self.config.stream.tick_interval_ms);
        let first = tokio::select! {
            biased;
            _ = stop.wait_for(|stop| *stop) => return Ok(TickOutcome::StopRequested),
            read = timeout(wait, stream.read(&mut ingest.read_buf)) => read,
        };

        let mut samples = Vec::new();
        let mut peer_closed = false;

        match first {
            Err(_) => return Ok(TickOutcome::Continue),
            Ok(Ok(0)) => peer_closed = true,
            Ok(Ok(n)) => self.decode(&ingest.read_buf[..n], &mut ingest.decoder, &mut samples),
            Ok(Err(e)) if e.kind() == ErrorKind::Interrupted => {}
            Ok(Err(e)) => return Err(StreamError::Io(e)),
        }

        let mut reads = 1;
        while !peer_closed && reads < self.config.stream.max_reads_per_tick {
            match stream.try_read(&mut ingest.read_buf) {
                Ok(0) => peer_closed = true,
                Ok(n) => self.decode(&ingest.read_buf[..n], &mut ingest.decoder, &mut samples),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(StreamError::Io(e)),
            }
            reads += 1;
        }

        if !samples.is_empty() {
            trace!(session_id = %self.id, reads, samples = samples.len(), "Tick received audio");
            ingest.tail.extend(&samples);
            if let Some(recorder) = ingest.recorder.as_mut() {
                recorder.append(&samples);
            }
            ingest.window.push(samples);

            self.sink.emit(SessionEvent::Waveform {
                session_id: self.id.clone(),
                samples: ingest.tail.snapshot(),
            });
        }

        if ingest.window.is_ready() {
            let window = ingest.window.drain();
            self.metrics.record_window();
            self.dispatch(window, ingest).await?;
        }

        if peer_closed {
            Ok(TickOutcome::PeerClosed)
        } else {
            Ok(TickOutcome::Continue)
        }
    }

    fn decode(&self, chunk: &[u8], decoder: &mut SampleDecoder, samples: &mut Vec<Sample>) {
        let decoded = decoder.decode(chunk);
        self.metrics.record_read(chunk.len(), decoded.samples.len(), decoded.dropped_bytes);

        if let Some(err) = decoded.misaligned {
            self.metrics.record_decode_error();
            match self.config.stream.remainder_policy {
                RemainderPolicy::Drop => {
                    warn!(session_id = %self.id, dropped_bytes = decoded.dropped_bytes, "{}", err)
                }
                RemainderPolicy::Carry => debug!(
                    session_id = %self.id,
                    pending_bytes = decoder.pending_bytes(),
                    "{}, carrying remainder",
                    err
                ),
            }
        }

        samples.extend(decoded.samples);
    }

    async fn dispatch(&self, window: Vec<Sample>, ingest: &mut Ingest) -> Result<(), StreamError> {
        debug!(session_id = %self.id, samples = window.len(), "Window complete");

        if let Some(worker) = ingest.worker.as_ref() {
            if worker.submit(window).await {
                self.metrics.record_dropped_window();
            }
            return Ok(());
        }

        let pipeline = Arc::clone(&self.pipeline);
        let outcome = tokio::task::spawn_blocking(move || pipeline.predict(&window))
            .await
            .map_err(|e| StreamError::Inference(format!("Inference task failed: {}", e)))?;

        match outcome {
            Ok(result) => {
                info!(
                    session_id = %self.id,
                    label = %result.label,
                    confidence = result.confidence,
                    processing_ms = result.processing_time_ms,
                    "Prediction"
                );
                self.metrics.record_prediction(&result);
                self.sink.emit(SessionEvent::Prediction {
                    session_id: self.id.clone(),
                    result,
                });
                Ok(())
            }
            Err(err) => {
                self.metrics.record_inference_failure();
                Err(err)
            }
        }
    }

    /// Update metrics for a worker outcome; returns the error if it is fatal.
    fn account(&self, outcome: InferenceOutcome) -> Option<StreamError> {
        match outcome {
            Ok(result) => {
                self.metrics.record_prediction(&result);
                None
            }
            Err(err) => {
                self.metrics.record_inference_failure();
                err.is_fatal().then_some(err)
            }
        }
    }
}

/// Current session as reported to HTTP clients.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub state: SessionState,
}

/// Start refused because a session is connecting or streaming.
#[derive(Debug)]
pub struct SessionBusy(pub SessionSnapshot);

impl fmt::Display for SessionBusy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Session {} is already {}",
            self.0.session_id.as_deref().unwrap_or("?"),
            self.0.state.name()
        )
    }
}

impl From<SessionBusy> for AppError {
    fn from(err: SessionBusy) -> Self {
        AppError::Conflict(err.to_string())
    }
}

#[derive(Default)]
struct Current {
    session_id: Option<String>,
    state: Option<watch::Receiver<SessionState>>,
    stop: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<SessionState>>,
}

impl Current {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            state: self
                .state
                .as_ref()
                .map(|rx| rx.borrow().clone())
                .unwrap_or(SessionState::Idle),
        }
    }
}

/// Single-session guard shared by the HTTP handlers.
pub struct SessionController {
    current: Mutex<Current>,
    pipeline: Arc<EmotionPipeline>,
    sink: Arc<dyn EventSink>,
    metrics: Arc<StreamMetrics>,
}

impl SessionController {
    pub fn new(pipeline: Arc<EmotionPipeline>, sink: Arc<dyn EventSink>, metrics: Arc<StreamMetrics>) -> Self {
        Self {
            current: Mutex::new(Current::default()),
            pipeline,
            sink,
            metrics,
        }
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.current.lock().await.snapshot()
    }

    /// Start a session with `config` unless one is already active.
    pub async fn start(&self, config: AppConfig) -> Result<SessionSnapshot, SessionBusy> {
        let mut current = self.current.lock().await;

        let snapshot = current.snapshot();
        if snapshot.state.is_active() {
            return Err(SessionBusy(snapshot));
        }

        let session_id = Uuid::new_v4().to_string();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);

        let session = StreamSession::new(
            session_id.clone(),
            config,
            Arc::clone(&self.pipeline),
            Arc::clone(&self.sink),
            Arc::clone(&self.metrics),
            state_tx,
        );
        self.metrics.record_session_started();
        let handle = tokio::spawn(session.run(stop_rx));

        *current = Current {
            session_id: Some(session_id),
            state: Some(state_rx),
            stop: Some(stop_tx),
            handle: Some(handle),
        };
        Ok(current.snapshot())
    }

    /// Request a stop and wait for the session to wind down.
    ///
    /// Without an active session this is a no-op returning the current state.
    pub async fn stop(&self) -> SessionSnapshot {
        let mut current = self.current.lock().await;
        if !current.snapshot().state.is_active() {
            return current.snapshot();
        }

        if let Some(stop) = current.stop.as_ref() {
            stop.send_replace(true);
        }

        if let Some(handle) = current.handle.take() {
            match handle.await {
                Ok(terminal) => {
                    return SessionSnapshot {
                        session_id: current.session_id.clone(),
                        state: terminal,
                    };
                }
                Err(e) => error!("Session task ended abnormally: {}", e),
            }
        }
        current.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::tests::stub_pipeline;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn encode(samples: &[Sample]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn test_config(port: u16) -> AppConfig {
        let mut config = AppConfig::default();
        config.stream.host = "127.0.0.1".to_string();
        config.stream.port = port;
        config.stream.tick_interval_ms = 10;
        config.stream.connect_timeout_ms = 2000;
        config
    }

    /// Fake recording device: sends `bytes` to the first client, then closes.
    async fn device_sending(bytes: Vec<u8>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&bytes).await.unwrap();
            socket.shutdown().await.ok();
        });
        port
    }

    /// Fake recording device: sends `bytes`, then holds the connection open.
    async fn device_streaming(bytes: Vec<u8>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&bytes).await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        port
    }

    /// Fake recording device that aborts the connection with a TCP reset.
    async fn device_resetting() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            // Zero linger turns the close into an RST.
            #[allow(deprecated)]
            socket.set_linger(Some(Duration::ZERO)).unwrap();
            drop(socket);
        });
        port
    }

    fn failure_kind(state: &SessionState) -> &str {
        match state {
            SessionState::Failed { kind, .. } => kind,
            other => panic!("Expected a failed session, got {:?}", other),
        }
    }

    /// Run a session to completion and collect every event it emitted.
    async fn run_session(config: AppConfig, output: &'static [f32]) -> (SessionState, Vec<SessionEvent>) {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SessionEvent>();
        let (state_tx, _state_rx) = watch::channel(SessionState::Idle);
        let (_stop_tx, stop_rx) = watch::channel(false);

        let session = StreamSession::new(
            "test".to_string(),
            config,
            Arc::new(stub_pipeline(output)),
            Arc::new(event_tx),
            Arc::new(StreamMetrics::default()),
            state_tx,
        );

        let terminal = tokio::time::timeout(Duration::from_secs(20), session.run(stop_rx))
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            events.push(event);
        }
        (terminal, events)
    }

    fn states(events: &[SessionEvent]) -> Vec<SessionState> {
        events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::StateChanged { state, .. } => Some(state.clone()),
                _ => None,
            })
            .collect()
    }

    fn predictions(events: &[SessionEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::Prediction { result, .. } => Some(result.label.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_peer_close_stops_and_discards_partial_window() {
        let port = device_sending(encode(&vec![7; 16000])).await;
        let (terminal, events) = run_session(test_config(port), &[0.9, 0.1]).await;

        assert_eq!(terminal, SessionState::Stopped);
        assert_eq!(
            states(&events),
            vec![
                SessionState::Connecting,
                SessionState::Streaming,
                SessionState::Stopped,
                SessionState::Idle
            ]
        );
        assert!(predictions(&events).is_empty());
        assert!(events.iter().any(|e| matches!(e, SessionEvent::Waveform { .. })));
    }

    #[tokio::test]
    async fn test_full_window_is_classified_before_stop() {
        let port = device_sending(encode(&vec![1000; 32000 + 100])).await;
        let (terminal, events) = run_session(test_config(port), &[0.2, 0.8]).await;

        assert_eq!(terminal, SessionState::Stopped);
        assert_eq!(predictions(&events), vec!["Neutral".to_string()]);

        // The prediction precedes the terminal state.
        let prediction_at = events
            .iter()
            .position(|e| matches!(e, SessionEvent::Prediction { .. }))
            .unwrap();
        let stopped_at = events
            .iter()
            .position(|e| matches!(e, SessionEvent::StateChanged { state: SessionState::Stopped, .. }))
            .unwrap();
        assert!(prediction_at < stopped_at);
    }

    #[tokio::test]
    async fn test_waveform_events_are_bounded() {
        let port = device_sending(encode(&vec![3; 8000])).await;
        let (_, events) = run_session(test_config(port), &[0.5, 0.5]).await;

        for event in &events {
            if let SessionEvent::Waveform { samples, .. } = event {
                assert!(samples.len() <= 512);
                assert!(samples.iter().all(|&s| s == 3));
            }
        }
    }

    #[tokio::test]
    async fn test_connect_failure_fails_then_idles() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (terminal, events) = run_session(test_config(port), &[0.5, 0.5]).await;
        match &terminal {
            SessionState::Failed { kind, .. } => assert_eq!(kind, "connect_error"),
            other => panic!("Expected a connect failure, got {:?}", other),
        }
        assert_eq!(states(&events).last(), Some(&SessionState::Idle));
    }

    #[tokio::test]
    async fn test_connection_reset_fails_with_io_error() {
        let port = device_resetting().await;
        let (terminal, events) = run_session(test_config(port), &[0.5, 0.5]).await;

        assert_eq!(failure_kind(&terminal), "io_error");
        let states = states(&events);
        assert_eq!(states[..2], [SessionState::Connecting, SessionState::Streaming]);
        assert_eq!(states[states.len() - 2], terminal);
        assert_eq!(states.last(), Some(&SessionState::Idle));
    }

    #[tokio::test]
    async fn test_model_output_mismatch_fails_inline_session() {
        // Three probabilities for two labels.
        let port = device_sending(encode(&vec![1000; 32000])).await;
        let (terminal, events) = run_session(test_config(port), &[0.1, 0.2, 0.7]).await;

        assert_eq!(failure_kind(&terminal), "inference_error");
        assert!(predictions(&events).is_empty());
        assert_eq!(
            states(&events)[2..],
            [terminal.clone(), SessionState::Idle]
        );
    }

    #[tokio::test]
    async fn test_worker_fatal_error_fails_session_on_next_tick() {
        // The device keeps the connection open, so only the worker can end the session.
        let port = device_streaming(encode(&vec![1000; 32000])).await;
        let mut config = test_config(port);
        config.inference.mode = InferenceMode::Worker;

        let (terminal, events) = run_session(config, &[0.1, 0.2, 0.7]).await;

        assert_eq!(failure_kind(&terminal), "inference_error");
        assert!(predictions(&events).is_empty());
        assert_eq!(states(&events).last(), Some(&SessionState::Idle));
    }

    #[tokio::test]
    async fn test_worker_mode_publishes_predictions() {
        let port = device_sending(encode(&vec![-500; 32000])).await;
        let mut config = test_config(port);
        config.inference.mode = InferenceMode::Worker;

        let (terminal, events) = run_session(config, &[0.7, 0.3]).await;
        assert_eq!(terminal, SessionState::Stopped);
        assert_eq!(predictions(&events), vec!["Happy".to_string()]);
    }

    #[tokio::test]
    async fn test_controller_guards_single_session_and_stops() {
        // A device that keeps the connection open without sending anything.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let (event_tx, _event_rx) = tokio::sync::broadcast::channel::<SessionEvent>(64);
        let controller = SessionController::new(
            Arc::new(stub_pipeline(&[0.5, 0.5])),
            Arc::new(event_tx),
            Arc::new(StreamMetrics::default()),
        );

        let started = controller.start(test_config(port)).await.unwrap();
        assert!(started.session_id.is_some());
        assert!(controller.start(test_config(port)).await.is_err());

        let stopped = controller.stop().await;
        assert_eq!(stopped.state, SessionState::Stopped);
        assert_eq!(stopped.session_id, started.session_id);
        assert_eq!(controller.snapshot().await.state, SessionState::Idle);

        // Nothing to stop any more.
        assert_eq!(controller.stop().await.state, SessionState::Idle);
    }
}

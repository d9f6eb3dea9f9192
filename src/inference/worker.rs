//! # Inference Worker
//!
//! Runs window classification off the ingest loop. The session hands over
//! owned windows through a single-slot mailbox: if a window is still waiting
//! when the next one completes, the waiting one is dropped. Predictions
//! therefore lag ingestion by at most one window.
//!
//! Fatal pipeline errors are reported back to the session, which fails on its
//! next tick. The worker exits after the first fatal error.
//!
//! ## Rust Concepts:
//! - **tokio::sync::Notify**: a wakeup without data; `notify_one` stores a permit
//!   when nobody is waiting, so a submit between `take()` and `notified()` is not lost
//! - **spawn_blocking**: feature extraction is CPU-bound and must not stall the
//!   async worker threads
//! - **Arc<EmotionPipeline>**: the pipeline is immutable, so sharing needs no lock

use super::{EmotionPipeline, PredictionResult};
use crate::audio::decoder::Sample;
use crate::error::StreamError;
use crate::events::{EventSink, SessionEvent};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct Mailbox {
    slot: Mutex<Option<Vec<Sample>>>,
    wake: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

pub struct InferenceWorker {
    mailbox: Arc<Mailbox>,
    handle: JoinHandle<()>,
}

/// Outcome of one inference, as seen by whoever needs to account for it.
pub type InferenceOutcome = Result<PredictionResult, StreamError>;

impl InferenceWorker {
    /// Start a worker for one session.
    ///
    /// `outcomes` receives a copy of every prediction and every error; the
    /// session uses it for metrics and to detect fatal failures.
    pub fn spawn(
        session_id: String,
        pipeline: Arc<EmotionPipeline>,
        sink: Arc<dyn EventSink>,
        outcomes: mpsc::UnboundedSender<InferenceOutcome>,
    ) -> Self {
        let mailbox = Arc::new(Mailbox::default());
        let handle = tokio::spawn(run(session_id, pipeline, sink, outcomes, Arc::clone(&mailbox)));
        Self { mailbox, handle }
    }

    /// Queue a window, replacing any window still waiting.
    ///
    /// Returns `true` when a waiting window was dropped.
    pub async fn submit(&self, window: Vec<Sample>) -> bool {
        let replaced = self.mailbox.slot.lock().await.replace(window).is_some();
        if replaced {
            let dropped = self.mailbox.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(dropped, "Inference is behind ingestion, dropped the oldest pending window");
        }
        self.mailbox.wake.notify_one();
        replaced
    }

    /// Finish the waiting and in-flight windows, then stop the worker.
    pub async fn shutdown(self) {
        self.mailbox.closed.store(true, Ordering::Release);
        self.mailbox.wake.notify_one();

        if let Err(e) = self.handle.await {
            error!("Inference worker panicked: {}", e);
        }
    }
}

async fn run(
    session_id: String,
    pipeline: Arc<EmotionPipeline>,
    sink: Arc<dyn EventSink>,
    outcomes: mpsc::UnboundedSender<InferenceOutcome>,
    mailbox: Arc<Mailbox>,
) {
    debug!(session_id = %session_id, "Inference worker started");

    loop {
        let next = mailbox.slot.lock().await.take();
        let window = match next {
            Some(window) => window,
            None if mailbox.closed.load(Ordering::Acquire) => break,
            None => {
                mailbox.wake.notified().await;
                continue;
            }
        };

        let pipeline = Arc::clone(&pipeline);
        let outcome = match tokio::task::spawn_blocking(move || pipeline.predict(&window)).await {
            Ok(outcome) => outcome,
            Err(e) => Err(StreamError::Inference(format!("Inference task failed: {}", e))),
        };

        match outcome {
            Ok(result) => {
                info!(
                    session_id = %session_id,
                    label = %result.label,
                    confidence = result.confidence,
                    processing_ms = result.processing_time_ms,
                    "Prediction"
                );
                let _ = outcomes.send(Ok(result.clone()));
                sink.emit(SessionEvent::Prediction {
                    session_id: session_id.clone(),
                    result,
                });
            }
            Err(err) => {
                error!(session_id = %session_id, error = %err, "Inference failed");
                let fatal = err.is_fatal();
                let _ = outcomes.send(Err(err));
                if fatal {
                    break;
                }
            }
        }
    }

    debug!(session_id = %session_id, "Inference worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::tests::stub_pipeline;
    use std::time::Duration;

    #[tokio::test]
    async fn test_worker_emits_predictions() {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SessionEvent>();
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
        let worker = InferenceWorker::spawn(
            "s1".to_string(),
            Arc::new(stub_pipeline(&[0.9, 0.1])),
            Arc::new(event_tx),
            outcome_tx,
        );

        assert!(!worker.submit(vec![0; 32000]).await);

        let event = tokio::time::timeout(Duration::from_secs(10), event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            SessionEvent::Prediction { session_id, result } => {
                assert_eq!(session_id, "s1");
                assert_eq!(result.label, "Happy");
            }
            other => panic!("Unexpected event: {:?}", other),
        }
        assert!(outcome_rx.recv().await.unwrap().is_ok());

        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_fatal_error_is_reported_and_stops_worker() {
        let (event_tx, _event_rx) = mpsc::unbounded_channel::<SessionEvent>();
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
        let worker = InferenceWorker::spawn(
            "s2".to_string(),
            Arc::new(stub_pipeline(&[0.5, 0.5])),
            Arc::new(event_tx),
            outcome_tx,
        );

        // An empty window cannot be analysed.
        worker.submit(Vec::new()).await;
        let outcome = tokio::time::timeout(Duration::from_secs(10), outcome_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.unwrap_err().code(), "shape_error");

        worker.shutdown().await;
    }
}

//! Analysis orchestration state machine
//!
//! One state machine per recording identifier:
//!
//! ```text
//! idle -> localAnalyzing -> localComplete -> cloudAnalyzing -> complete
//!              |                                   |
//!              +-> error                           +-> error
//! ```
//!
//! `complete` and `error` are terminal. The local result is published to
//! observers the moment it exists — never held back for the cloud phase —
//! and observers are guaranteed to see `localComplete` before `complete`
//! for the same recording. Different recordings run as independent task
//! graphs and interleave freely.
//!
//! Upload failures retry with bounded attempts and exponential backoff;
//! waiting for the engine result is bounded by a timeout. Cancellation is
//! cooperative: checked at every suspension point, and the result-channel
//! subscription is released synchronously with the `cancel` call returning.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use uuid::Uuid;

use crate::audio::{AudioSample, CaptureContext};
use crate::biomarkers::feature_map::FeatureMapError;
use crate::biomarkers::{BasicVoiceMetrics, VocalBiomarkers};
use crate::config::CloudConfig;
use crate::engine::{AnalysisUploader, UploadError};
use crate::events::{EventSink, PipelineEvent};
use crate::local_estimator::{EstimatorError, LocalEstimator};
use crate::subscription::{EngineOutcome, ResultRouter, ResultSubscription};

/// Initial backoff delay for upload retries
const INITIAL_BACKOFF_MS: u64 = 500;

/// Maximum backoff delay
const MAX_BACKOFF_MS: u64 = 5000;

/// Why an analysis terminated in `error`.
#[derive(Debug, Clone, Error, Serialize)]
pub enum AnalysisFailure {
    /// Quality gate rejected the recording; user-actionable (re-record)
    #[error("insufficient signal level (rms {rms:.6})")]
    InsufficientSignalLevel { rms: f32 },
    /// Local estimator failed; terminal, not retried
    #[error("local analysis failed: {0}")]
    LocalAnalysis(String),
    /// Transport failure after the retry budget was exhausted
    #[error("upload failed after {attempts} attempts: {message}")]
    UploadFailed { attempts: u32, message: String },
    /// The engine reported a processing failure
    #[error("engine processing failed: {0}")]
    Processing(String),
    /// The engine result was missing or carried invalid fields
    #[error("engine result malformed: {0}")]
    MalformedResult(#[from] FeatureMapError),
    /// No result arrived within the configured bound
    #[error("no engine result within {timeout_secs}s")]
    ResultTimeout { timeout_secs: u64 },
    #[error("analysis cancelled")]
    Cancelled,
}

impl From<EstimatorError> for AnalysisFailure {
    fn from(err: EstimatorError) -> Self {
        match err {
            EstimatorError::InsufficientSignalLevel { rms } => {
                AnalysisFailure::InsufficientSignalLevel { rms }
            }
            other => AnalysisFailure::LocalAnalysis(other.to_string()),
        }
    }
}

/// Submission-time error, rejected synchronously at the call site.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("analysis already in progress for recording {0}")]
    AlreadyInProgress(Uuid),
}

/// Per-recording state. `Complete` and `Error` are terminal.
#[derive(Debug, Clone, Serialize)]
pub enum AnalysisState {
    Idle,
    LocalAnalyzing,
    LocalComplete(BasicVoiceMetrics),
    CloudAnalyzing,
    Complete(VocalBiomarkers),
    Error(AnalysisFailure),
}

impl AnalysisState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalysisState::Complete(_) | AnalysisState::Error(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            AnalysisState::Idle => "idle",
            AnalysisState::LocalAnalyzing => "localAnalyzing",
            AnalysisState::LocalComplete(_) => "localComplete",
            AnalysisState::CloudAnalyzing => "cloudAnalyzing",
            AnalysisState::Complete(_) => "complete",
            AnalysisState::Error(_) => "error",
        }
    }
}

/// Observer notification for one recording, delivered in transition order.
#[derive(Debug, Clone)]
pub enum AnalysisEvent {
    /// The fast local estimate is ready (intermediate, not terminal)
    LocalComplete(BasicVoiceMetrics),
    Complete(VocalBiomarkers),
    Error(AnalysisFailure),
}

impl AnalysisEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalysisEvent::Complete(_) | AnalysisEvent::Error(_))
    }
}

struct StateEntry {
    /// Which submission generation owns this slot; a stale task (cancelled
    /// and superseded by a resubmission) cannot write into a successor's
    /// analysis
    epoch: u64,
    state: AnalysisState,
}

struct Shared {
    states: Mutex<HashMap<Uuid, StateEntry>>,
    next_epoch: Mutex<u64>,
    router: Arc<ResultRouter>,
    sink: Arc<dyn EventSink>,
}

impl Shared {
    /// Apply a transition unless the recording already reached a terminal
    /// state or the writer's epoch is stale. The observer event is forwarded
    /// while the lock is held so events always arrive in transition order.
    fn transition(
        &self,
        recording_id: Uuid,
        epoch: u64,
        new_state: AnalysisState,
        events_tx: &mpsc::UnboundedSender<AnalysisEvent>,
    ) -> bool {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());

        let from = match states.get(&recording_id) {
            Some(entry) => {
                if entry.epoch != epoch || entry.state.is_terminal() {
                    return false;
                }
                entry.state.label()
            }
            None => "idle",
        };

        let to = new_state.label();
        let event = match &new_state {
            AnalysisState::LocalComplete(metrics) => {
                Some(AnalysisEvent::LocalComplete(metrics.clone()))
            }
            AnalysisState::Complete(biomarkers) => {
                Some(AnalysisEvent::Complete(biomarkers.clone()))
            }
            AnalysisState::Error(failure) => Some(AnalysisEvent::Error(failure.clone())),
            _ => None,
        };

        states.insert(
            recording_id,
            StateEntry {
                epoch,
                state: new_state,
            },
        );
        self.sink.emit(PipelineEvent::StateTransition {
            recording_id,
            from,
            to,
        });
        if let Some(event) = event {
            let _ = events_tx.send(event);
        }
        true
    }

    /// Terminal failure transition plus the structured failure event.
    /// No-op (and no failure event) if the recording is already terminal.
    fn fail(
        &self,
        recording_id: Uuid,
        epoch: u64,
        stage: &'static str,
        failure: AnalysisFailure,
        events_tx: &mpsc::UnboundedSender<AnalysisEvent>,
    ) -> bool {
        let message = failure.to_string();
        let applied =
            self.transition(recording_id, epoch, AnalysisState::Error(failure), events_tx);
        if applied {
            self.sink.emit(PipelineEvent::Failure {
                recording_id,
                stage,
                message,
            });
        }
        applied
    }
}

/// Orchestrates the two-phase analysis of recordings.
pub struct AnalysisOrchestrator {
    estimator: LocalEstimator,
    uploader: Arc<dyn AnalysisUploader>,
    cloud: CloudConfig,
    shared: Arc<Shared>,
}

impl AnalysisOrchestrator {
    pub fn new(
        estimator: LocalEstimator,
        uploader: Arc<dyn AnalysisUploader>,
        router: Arc<ResultRouter>,
        sink: Arc<dyn EventSink>,
        cloud: CloudConfig,
    ) -> Self {
        Self {
            estimator,
            uploader,
            cloud,
            shared: Arc::new(Shared {
                states: Mutex::new(HashMap::new()),
                next_epoch: Mutex::new(0),
                router,
                sink,
            }),
        }
    }

    /// Start analyzing a recording.
    ///
    /// Rejects synchronously with [`AnalysisError::AlreadyInProgress`] if an
    /// analysis for the same identifier has not yet reached a terminal
    /// state. A terminal identifier may be resubmitted (fresh analysis).
    pub fn submit(
        &self,
        recording_id: Uuid,
        sample: AudioSample,
        context: CaptureContext,
    ) -> Result<AnalysisHandle, AnalysisError> {
        let epoch = {
            let mut states = self.shared.states.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = states.get(&recording_id) {
                if !entry.state.is_terminal() {
                    return Err(AnalysisError::AlreadyInProgress(recording_id));
                }
            }
            let mut next_epoch = self
                .shared
                .next_epoch
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let epoch = *next_epoch;
            *next_epoch += 1;
            states.insert(
                recording_id,
                StateEntry {
                    epoch,
                    state: AnalysisState::LocalAnalyzing,
                },
            );
            epoch
        };
        self.shared.sink.emit(PipelineEvent::StateTransition {
            recording_id,
            from: "idle",
            to: "localAnalyzing",
        });
        info!("Analysis submitted for recording {}", recording_id);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        // Subscribe before the upload ever happens so an early engine result
        // cannot slip past the router
        let subscription = self.shared.router.subscribe(recording_id);
        let subscription_token = subscription.token();

        let task = RecordingTask {
            shared: Arc::clone(&self.shared),
            estimator: self.estimator.clone(),
            uploader: Arc::clone(&self.uploader),
            cloud: self.cloud.clone(),
            recording_id,
            epoch,
            sample,
            context,
            events_tx: events_tx.clone(),
            cancel_rx,
            subscription,
        };
        tokio::spawn(task.run());

        Ok(AnalysisHandle {
            recording_id,
            epoch,
            subscription_token,
            events_rx,
            events_tx,
            cancel_tx,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Snapshot of a recording's current state.
    pub fn state(&self, recording_id: Uuid) -> Option<AnalysisState> {
        self.shared
            .states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&recording_id)
            .map(|entry| entry.state.clone())
    }
}

/// Caller-side handle for one submitted recording.
pub struct AnalysisHandle {
    recording_id: Uuid,
    epoch: u64,
    subscription_token: u64,
    events_rx: mpsc::UnboundedReceiver<AnalysisEvent>,
    events_tx: mpsc::UnboundedSender<AnalysisEvent>,
    cancel_tx: watch::Sender<bool>,
    shared: Arc<Shared>,
}

impl AnalysisHandle {
    pub fn recording_id(&self) -> Uuid {
        self.recording_id
    }

    /// Next observer event, in strict transition order.
    pub async fn next_event(&mut self) -> Option<AnalysisEvent> {
        self.events_rx.recv().await
    }

    /// Drain events until the analysis reaches `complete` or `error`.
    pub async fn wait_terminal(&mut self) -> Option<AnalysisEvent> {
        while let Some(event) = self.next_event().await {
            if event.is_terminal() {
                return Some(event);
            }
        }
        None
    }

    /// Cancel the analysis.
    ///
    /// Stops any pending retry/backoff and releases the result-channel
    /// subscription before this call returns. No-op once the analysis is
    /// terminal.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
        let applied = self.shared.fail(
            self.recording_id,
            self.epoch,
            "cancel",
            AnalysisFailure::Cancelled,
            &self.events_tx,
        );
        // Token-guarded: never evicts a successor analysis's subscription
        self.shared
            .router
            .release_token(self.recording_id, self.subscription_token);
        if applied {
            info!("Analysis cancelled for recording {}", self.recording_id);
        }
    }
}

struct RecordingTask {
    shared: Arc<Shared>,
    estimator: LocalEstimator,
    uploader: Arc<dyn AnalysisUploader>,
    cloud: CloudConfig,
    recording_id: Uuid,
    epoch: u64,
    sample: AudioSample,
    context: CaptureContext,
    events_tx: mpsc::UnboundedSender<AnalysisEvent>,
    cancel_rx: watch::Receiver<bool>,
    subscription: ResultSubscription,
}

/// Terminal result of one recording task. `None` means cancelled (the
/// cancel path already wrote the terminal state).
type TaskOutcome = Option<Result<VocalBiomarkers, (&'static str, AnalysisFailure)>>;

impl RecordingTask {
    async fn run(mut self) {
        let recording_id = self.recording_id;
        let epoch = self.epoch;

        let outcome = self.execute().await;

        // Release before the terminal transition becomes observable: a
        // caller that sees `complete`/`error` must find no live
        // subscription behind it
        self.subscription.release();

        match outcome {
            None => {}
            Some(Ok(biomarkers)) => {
                self.shared.transition(
                    recording_id,
                    epoch,
                    AnalysisState::Complete(biomarkers),
                    &self.events_tx,
                );
            }
            Some(Err((stage, failure))) => {
                self.shared
                    .fail(recording_id, epoch, stage, failure, &self.events_tx);
            }
        }
    }

    async fn execute(&mut self) -> TaskOutcome {
        let recording_id = self.recording_id;
        let epoch = self.epoch;

        // --- Local phase ---
        let metrics = tokio::select! {
            _ = wait_cancelled(&mut self.cancel_rx) => return None,
            result = self.estimator.estimate(&self.sample, self.context) => match result {
                Ok(metrics) => metrics,
                Err(err) => return Some(Err(("local", err.into()))),
            },
        };

        // Publish the intermediate result immediately; the cloud phase may
        // take orders of magnitude longer
        if !self.shared.transition(
            recording_id,
            epoch,
            AnalysisState::LocalComplete(metrics),
            &self.events_tx,
        ) {
            return None;
        }
        if !self.shared.transition(
            recording_id,
            epoch,
            AnalysisState::CloudAnalyzing,
            &self.events_tx,
        ) {
            return None;
        }

        // --- Upload with bounded retries ---
        let max_attempts = self.cloud.upload_max_retries.max(1);
        let mut last_error: Option<UploadError> = None;
        let mut uploaded = false;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let backoff = calculate_backoff(attempt - 1);
                warn!(
                    "Upload attempt {} for {} failed, retrying in {:?}",
                    attempt, recording_id, backoff
                );
                tokio::select! {
                    _ = wait_cancelled(&mut self.cancel_rx) => return None,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }

            let outcome = tokio::select! {
                _ = wait_cancelled(&mut self.cancel_rx) => return None,
                outcome = self.uploader.upload(recording_id, &self.sample) => outcome,
            };

            match outcome {
                Ok(()) => {
                    uploaded = true;
                    break;
                }
                Err(err) if err.retryable => {
                    last_error = Some(err);
                }
                Err(err) => {
                    // Terminal rejection: retrying cannot help
                    return Some(Err((
                        "upload",
                        AnalysisFailure::UploadFailed {
                            attempts: attempt + 1,
                            message: err.message,
                        },
                    )));
                }
            }
        }

        if !uploaded {
            let message = last_error
                .map(|e| e.message)
                .unwrap_or_else(|| "upload failed".to_string());
            return Some(Err((
                "upload",
                AnalysisFailure::UploadFailed {
                    attempts: max_attempts,
                    message,
                },
            )));
        }

        // --- Await the engine result ---
        let timeout = Duration::from_secs(self.cloud.result_timeout_secs);
        let outcome = tokio::select! {
            _ = wait_cancelled(&mut self.cancel_rx) => return None,
            _ = tokio::time::sleep(timeout) => {
                return Some(Err((
                    "cloud",
                    AnalysisFailure::ResultTimeout {
                        timeout_secs: self.cloud.result_timeout_secs,
                    },
                )));
            }
            outcome = self.subscription.recv() => outcome,
        };

        match outcome {
            // Subscription released out from under us: cancelled
            None => None,
            Some(EngineOutcome::Failed(message)) => {
                Some(Err(("cloud", AnalysisFailure::Processing(message))))
            }
            Some(EngineOutcome::Completed(map)) => {
                match VocalBiomarkers::from_feature_map(&map, self.sample.duration_seconds) {
                    Ok(biomarkers) => Some(Ok(biomarkers)),
                    Err(err) => Some(Err(("cloud", AnalysisFailure::MalformedResult(err)))),
                }
            }
        }
    }
}

/// Resolve when cancellation is requested. If the handle is dropped without
/// cancelling, the analysis continues detached.
async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Exponential backoff with jitter for upload retries.
fn calculate_backoff(attempt: u32) -> Duration {
    let base_delay = INITIAL_BACKOFF_MS * 2u64.pow(attempt);
    let capped_delay = base_delay.min(MAX_BACKOFF_MS);
    let jitter = (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_millis() as u64)
        % 100;
    Duration::from_millis(capped_delay + jitter)
}

//! Structured pipeline events
//!
//! The core emits typed events for state transitions, validation outcomes,
//! and failures. Consumers plug in their own [`EventSink`]; the default
//! [`TracingEventSink`] forwards to `tracing` with structured fields so a
//! failing check can be reconstructed from logs alone.

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

/// A structured event from the analysis core.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Orchestrator state machine moved for one recording
    StateTransition {
        recording_id: Uuid,
        from: &'static str,
        to: &'static str,
    },
    /// Baseline validation finished for a user
    ValidationOutcome {
        user_id: String,
        accepted: bool,
        confidence: f32,
        failed_checks: Vec<String>,
    },
    /// A technical failure terminated an analysis
    Failure {
        recording_id: Uuid,
        stage: &'static str,
        message: String,
    },
}

/// Consumer seam for structured events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// Default sink: structured emission via `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: PipelineEvent) {
        match &event {
            PipelineEvent::StateTransition {
                recording_id,
                from,
                to,
            } => {
                info!(%recording_id, from, to, "analysis state transition");
            }
            PipelineEvent::ValidationOutcome {
                user_id,
                accepted,
                confidence,
                failed_checks,
            } => {
                if *accepted {
                    info!(%user_id, confidence, "baseline validation accepted");
                } else {
                    info!(
                        %user_id,
                        confidence,
                        failed = %failed_checks.join(","),
                        "baseline validation rejected"
                    );
                }
            }
            PipelineEvent::Failure {
                recording_id,
                stage,
                message,
            } => {
                warn!(%recording_id, stage, %message, "analysis failure");
            }
        }
    }
}

/// Capturing sink for test assertions.
#[cfg(test)]
#[derive(Default, Clone)]
pub struct RecordingSink {
    pub events: std::sync::Arc<std::sync::Mutex<Vec<PipelineEvent>>>,
}

#[cfg(test)]
impl EventSink for RecordingSink {
    fn emit(&self, event: PipelineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transition_serialization() {
        let event = PipelineEvent::StateTransition {
            recording_id: Uuid::nil(),
            from: "idle",
            to: "localAnalyzing",
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"state_transition\""));
        assert!(json.contains("localAnalyzing"));
    }

    #[test]
    fn test_validation_outcome_carries_failed_checks() {
        let event = PipelineEvent::ValidationOutcome {
            user_id: "user-1".to_string(),
            accepted: false,
            confidence: 83.3,
            failed_checks: vec!["duration".to_string(), "jitter_local".to_string()],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("duration"));
        assert!(json.contains("jitter_local"));
    }

    #[test]
    fn test_tracing_sink_does_not_panic() {
        let sink = TracingEventSink;
        sink.emit(PipelineEvent::Failure {
            recording_id: Uuid::new_v4(),
            stage: "upload",
            message: "connection refused".to_string(),
        });
    }
}

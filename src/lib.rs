pub mod audio;
pub mod baseline;
pub mod biomarkers;
pub mod config;
pub mod engine;
pub mod events;
pub mod local_estimator;
pub mod orchestrator;
pub mod quality;
pub mod subscription;


pub use audio::{AudioSample, CaptureContext};
pub use baseline::lifecycle::{BaselineLifecycleManager, BaselineStore, InMemoryBaselineStore};
pub use baseline::validation::{BaselineValidationEngine, ValidationOutcome};
pub use baseline::{PersonalizedThresholds, RecordingContext, VocalBaseline};
pub use biomarkers::demographics::{GenderIdentity, VoiceDemographic};
pub use biomarkers::thresholds::ClinicalThresholdsProvider;
pub use biomarkers::{BasicVoiceMetrics, VocalBiomarkers};
pub use config::AnalysisConfig;
pub use engine::{AnalysisUploader, EngineClient, UploadError};
pub use events::{EventSink, PipelineEvent, TracingEventSink};
pub use local_estimator::LocalEstimator;
pub use orchestrator::{
    AnalysisError, AnalysisEvent, AnalysisFailure, AnalysisHandle, AnalysisOrchestrator,
    AnalysisState,
};
pub use quality::{QualityGate, SignalQuality};
pub use subscription::{EngineOutcome, ResultEnvelope, ResultRouter};

use tracing_subscriber::EnvFilter;

/// Initialize logging for binaries and integration harnesses.
///
/// Respects `RUST_LOG`; defaults to `info`.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

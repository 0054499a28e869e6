//! Fast local F0 estimate
//!
//! The first phase of every analysis: a low-precision on-device estimate
//! surfaced to the user within seconds, long before the external engine's
//! result arrives. Runs the quality gate first — a rejected signal never
//! reaches the pitch detector.
//!
//! ## Algorithm
//! 1. Segment audio into overlapping frames
//! 2. McLeod pitch detection per frame
//! 3. Filter to the human vocal range (50Hz - 500Hz)
//! 4. Mean/std over voiced frames; confidence = voiced ratio
//!
//! No network or persistence side effects.

use chrono::Utc;
use pitch_detection::detector::mcleod::McLeodDetector;
use pitch_detection::detector::PitchDetector;
use thiserror::Error;
use tracing::debug;

use crate::audio::{AudioSample, CaptureContext};
use crate::biomarkers::BasicVoiceMetrics;
use crate::config::EstimatorConfig;
use crate::quality::{QualityGate, SignalQuality, DEGRADED_CONFIDENCE_PENALTY};

/// Frame size for pitch detection (~64ms at 16kHz)
const FRAME_SIZE: usize = 1024;

/// Hop size between frames (50% overlap)
const HOP_SIZE: usize = 512;

/// Minimum pitch in Hz (human vocal range)
const MIN_PITCH: f32 = 50.0;

/// Maximum pitch in Hz (human vocal range)
const MAX_PITCH: f32 = 500.0;

/// Power threshold for pitch detection
const POWER_THRESHOLD: f32 = 0.8;

/// Clarity threshold for pitch detection
const CLARITY_THRESHOLD: f32 = 0.5;

/// Minimum number of voiced frames required for a valid estimate
const MIN_VOICED_FRAMES: usize = 5;

/// Local-phase failure. All variants are terminal for the recording.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EstimatorError {
    /// Quality gate rejected the recording outright
    #[error("insufficient signal level (rms {rms:.6})")]
    InsufficientSignalLevel { rms: f32 },
    /// Too little voiced content to estimate F0
    #[error("insufficient voiced frames ({voiced} of {total})")]
    InsufficientVoicedFrames { voiced: usize, total: usize },
    #[error("local estimate exceeded the {budget_secs}s budget")]
    BudgetExceeded { budget_secs: u64 },
    #[error("local estimate task failed: {0}")]
    TaskFailed(String),
}

/// Fast local F0 estimator.
#[derive(Debug, Clone)]
pub struct LocalEstimator {
    gate: QualityGate,
    config: EstimatorConfig,
}

impl LocalEstimator {
    pub fn new(gate: QualityGate, config: EstimatorConfig) -> Self {
        Self { gate, config }
    }

    /// Produce a [`BasicVoiceMetrics`] for the sample, within the wall-time
    /// budget.
    ///
    /// The quality gate runs first: `Reject` short-circuits before any
    /// pitch detection; `Degraded` multiplies the confidence by 0.7.
    pub async fn estimate(
        &self,
        sample: &AudioSample,
        context: CaptureContext,
    ) -> Result<BasicVoiceMetrics, EstimatorError> {
        let quality = self.gate.evaluate(sample.rms, context);
        if quality == SignalQuality::Reject {
            return Err(EstimatorError::InsufficientSignalLevel { rms: sample.rms });
        }

        let samples = sample.samples.clone();
        let sample_rate = sample.sample_rate as usize;
        let budget = std::time::Duration::from_secs(self.config.budget_secs);

        let estimate = tokio::time::timeout(
            budget,
            tokio::task::spawn_blocking(move || estimate_f0(&samples, sample_rate)),
        )
        .await
        .map_err(|_| EstimatorError::BudgetExceeded {
            budget_secs: self.config.budget_secs,
        })?
        .map_err(|e| EstimatorError::TaskFailed(e.to_string()))??;

        let raw_confidence = (estimate.voiced_ratio * 100.0).min(100.0);
        let degraded = quality == SignalQuality::Degraded;
        let confidence_ratio = if degraded {
            raw_confidence * DEGRADED_CONFIDENCE_PENALTY
        } else {
            raw_confidence
        };

        debug!(
            "Local estimate: {:.1} Hz (std {:.1}), confidence {:.0}%{}",
            estimate.f0_mean,
            estimate.f0_std,
            confidence_ratio,
            if degraded { " [degraded]" } else { "" }
        );

        Ok(BasicVoiceMetrics {
            f0_mean: estimate.f0_mean,
            f0_std: estimate.f0_std,
            confidence_ratio,
            computed_at: Utc::now(),
            quality_degraded: degraded,
        })
    }
}

struct F0Estimate {
    f0_mean: f32,
    f0_std: f32,
    voiced_ratio: f32,
}

/// Frame-by-frame McLeod pitch pass over the whole buffer.
///
/// The buffer is peak-normalized first so quiet-but-analyzable recordings
/// (the gate's degraded band) still clear the detector's power threshold;
/// normalization does not move the detected frequency.
fn estimate_f0(samples: &[f32], sample_rate: usize) -> Result<F0Estimate, EstimatorError> {
    if samples.len() < FRAME_SIZE {
        return Err(EstimatorError::InsufficientVoicedFrames { voiced: 0, total: 0 });
    }

    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    let normalized: Vec<f32> = if peak > 0.0 && peak < 1.0 {
        samples.iter().map(|s| s / peak).collect()
    } else {
        samples.to_vec()
    };
    let samples = normalized.as_slice();

    let mut detector = McLeodDetector::new(FRAME_SIZE, FRAME_SIZE / 2);
    let mut pitches = Vec::new();
    let mut total_frames = 0;

    let mut start = 0;
    while start + FRAME_SIZE <= samples.len() {
        let frame = &samples[start..start + FRAME_SIZE];
        total_frames += 1;

        if let Some(pitch) = detector.get_pitch(frame, sample_rate, POWER_THRESHOLD, CLARITY_THRESHOLD) {
            if pitch.frequency >= MIN_PITCH && pitch.frequency <= MAX_PITCH {
                pitches.push(pitch.frequency);
            }
        }

        start += HOP_SIZE;
    }

    if pitches.len() < MIN_VOICED_FRAMES {
        return Err(EstimatorError::InsufficientVoicedFrames {
            voiced: pitches.len(),
            total: total_frames,
        });
    }

    let mean = pitches.iter().sum::<f32>() / pitches.len() as f32;
    let variance = pitches.iter().map(|p| (p - mean).powi(2)).sum::<f32>() / pitches.len() as f32;

    Ok(F0Estimate {
        f0_mean: mean,
        f0_std: variance.sqrt(),
        voiced_ratio: pitches.len() as f32 / total_frames as f32,
    })
}

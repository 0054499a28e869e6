//! Vocal baseline aggregate
//!
//! A baseline is a user's reference biomarker set, created only through
//! successful clinical validation. Replacing a baseline never mutates the
//! old aggregate: the prior is wrapped in an [`ArchivedBaseline`] record and
//! the replacement history carries forward, append-only. At most one active
//! baseline exists per user — enforced by the lifecycle manager, not by the
//! aggregate itself.

pub mod lifecycle;
pub mod validation;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::biomarkers::demographics::VoiceDemographic;
use crate::biomarkers::thresholds::F0Range;
use crate::biomarkers::VocalBiomarkers;
use validation::CheckFailure;

/// Why the recording behind a baseline was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordingContext {
    Onboarding,
    FollowUp,
    Recalibration,
}

/// Validation verdict, computed once at construction and never changed in
/// place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidationStatus {
    Accepted { confidence: f32 },
    Rejected { failed_checks: Vec<CheckFailure> },
}

/// One replacement step in a baseline's lineage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplacementRecord {
    /// The baseline that was archived by this replacement
    pub replaced_id: Uuid,
    pub replaced_at: DateTime<Utc>,
    /// Context of the recording that triggered the replacement
    pub context: RecordingContext,
}

/// A user's established vocal baseline (aggregate root).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocalBaseline {
    pub id: Uuid,
    pub user_id: String,
    pub established_at: DateTime<Utc>,
    pub biomarkers: VocalBiomarkers,
    pub demographic: VoiceDemographic,
    pub recording_context: RecordingContext,
    pub validation_status: ValidationStatus,
    /// The prior baseline this one replaced, if any
    pub archived_baseline: Option<Box<ArchivedBaseline>>,
    /// Lineage of replacements, oldest first; grows monotonically
    pub replacement_history: Vec<ReplacementRecord>,
}

/// An archived (non-active) baseline. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedBaseline {
    pub baseline: VocalBaseline,
    pub archived_at: DateTime<Utc>,
    /// The baseline that took over as active
    pub superseded_by: Uuid,
}

/// Pass/fail criteria personalized to a user's own baseline.
///
/// Recomputed on demand from the active baseline; never persisted
/// independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalizedThresholds {
    pub f0_range: F0Range,
    pub max_jitter_local: f32,
    pub max_jitter_rap: f32,
    pub max_jitter_ppq5: f32,
    pub max_shimmer_local: f32,
    pub max_shimmer_apq3: f32,
    pub max_shimmer_apq5: f32,
    pub min_hnr_mean: f32,
    pub max_hnr_std: f32,
}

impl PersonalizedThresholds {
    /// Derive personalized bounds from a baseline.
    ///
    /// F0 range is ±20% of the baseline mean; jitter/shimmer ceilings are
    /// 1.5× the baseline values; HNR floor is 80% of the baseline mean and
    /// the std ceiling 120% of the baseline std.
    pub fn from_baseline(baseline: &VocalBaseline) -> Self {
        let biomarkers = &baseline.biomarkers;
        Self {
            f0_range: F0Range {
                min: biomarkers.f0.mean * 0.8,
                max: biomarkers.f0.mean * 1.2,
            },
            max_jitter_local: biomarkers.quality.jitter.local * 1.5,
            max_jitter_rap: biomarkers.quality.jitter.rap * 1.5,
            max_jitter_ppq5: biomarkers.quality.jitter.ppq5 * 1.5,
            max_shimmer_local: biomarkers.quality.shimmer.local * 1.5,
            max_shimmer_apq3: biomarkers.quality.shimmer.apq3 * 1.5,
            max_shimmer_apq5: biomarkers.quality.shimmer.apq5 * 1.5,
            min_hnr_mean: biomarkers.quality.hnr.mean * 0.8,
            max_hnr_std: biomarkers.quality.hnr.std * 1.2,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_baseline(user_id: &str, f0_mean: f32) -> VocalBaseline {
    use crate::biomarkers::{healthy_quality_measures, AnalysisMetadata, F0Analysis};

    let biomarkers = VocalBiomarkers::new(
        F0Analysis::new(f0_mean, 6.0, 90.0),
        healthy_quality_measures(),
        AnalysisMetadata {
            voiced_ratio: 0.85,
            recording_duration_seconds: 5.0,
            frame_count: 500,
            voiced_frame_count: 425,
        },
    );
    VocalBaseline {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        established_at: Utc::now(),
        biomarkers,
        demographic: VoiceDemographic::AdultFemale,
        recording_context: RecordingContext::Onboarding,
        validation_status: ValidationStatus::Accepted { confidence: 100.0 },
        archived_baseline: None,
        replacement_history: Vec::new(),
    }
}

//! Vocal biomarker data model
//!
//! Types for both phases of an analysis:
//!
//! - **Local phase** — [`BasicVoiceMetrics`], the fast low-precision F0
//!   estimate surfaced to the user within seconds.
//! - **Cloud phase** — [`VocalBiomarkers`], the validated high-precision set
//!   (F0, jitter, shimmer, HNR) parsed from the external engine's feature
//!   map.
//!
//! All values are immutable once produced; replacing an analysis result
//! creates a new value (append-only history model).

pub mod demographics;
pub mod feature_map;
pub mod thresholds;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use thresholds::ClinicalThresholds;

/// Fast local estimate produced once per recording before the cloud phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicVoiceMetrics {
    /// Mean F0 in Hz
    pub f0_mean: f32,
    /// F0 standard deviation in Hz
    pub f0_std: f32,
    /// Estimate confidence, 0-100 (voiced-frame ratio, penalized when the
    /// quality gate reported a degraded signal)
    pub confidence_ratio: f32,
    pub computed_at: DateTime<Utc>,
    /// Whether the quality gate discounted this estimate
    pub quality_degraded: bool,
}

/// F0 stability bucket derived from the coefficient of variation (std/mean).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StabilityLevel {
    Low,
    Medium,
    High,
}

impl StabilityLevel {
    /// CV < 0.05 is high stability, < 0.15 medium, anything noisier low.
    pub fn from_f0(mean: f32, std: f32) -> Self {
        if mean <= 0.0 {
            return StabilityLevel::Low;
        }
        let cv = std / mean;
        if cv < 0.05 {
            StabilityLevel::High
        } else if cv < 0.15 {
            StabilityLevel::Medium
        } else {
            StabilityLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StabilityLevel::Low => "low",
            StabilityLevel::Medium => "medium",
            StabilityLevel::High => "high",
        }
    }
}

/// Fundamental frequency analysis from the external engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct F0Analysis {
    /// Mean F0 in Hz
    pub mean: f32,
    /// F0 standard deviation in Hz
    pub std: f32,
    /// Voiced-frame confidence, 0-100
    pub confidence_ratio: f32,
    pub stability_level: StabilityLevel,
}

impl F0Analysis {
    pub fn new(mean: f32, std: f32, confidence_ratio: f32) -> Self {
        Self {
            mean,
            std,
            confidence_ratio,
            stability_level: StabilityLevel::from_f0(mean, std),
        }
    }

    /// Whether the mean F0 falls inside the demographic's expected range.
    pub fn within_range(&self, thresholds: &ClinicalThresholds) -> bool {
        self.mean >= thresholds.f0_range.min && self.mean <= thresholds.f0_range.max
    }
}

/// Cycle-to-cycle period perturbation measures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JitterMeasures {
    /// Local jitter in %
    pub local: f32,
    /// Absolute jitter in microseconds
    pub absolute: f32,
    /// Relative average perturbation in %
    pub rap: f32,
    /// 5-point period perturbation quotient in %
    pub ppq5: f32,
}

/// Cycle-to-cycle amplitude perturbation measures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShimmerMeasures {
    /// Local shimmer in %
    pub local: f32,
    /// Shimmer in dB
    pub db: f32,
    /// 3-point amplitude perturbation quotient in %
    pub apq3: f32,
    /// 5-point amplitude perturbation quotient in %
    pub apq5: f32,
}

/// Harmonics-to-noise ratio measures, in dB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnrMeasures {
    pub mean: f32,
    pub std: f32,
}

/// Voice quality measures from the external engine, immutable once parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceQualityMeasures {
    pub jitter: JitterMeasures,
    pub shimmer: ShimmerMeasures,
    pub hnr: HnrMeasures,
}

/// Recording-level context for a completed analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    /// Fraction of frames with detected voicing, 0.0-1.0
    pub voiced_ratio: f32,
    pub recording_duration_seconds: f32,
    pub frame_count: u32,
    pub voiced_frame_count: u32,
}

/// The complete validated biomarker set for one recording.
///
/// Produced exactly once per completed cloud phase; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocalBiomarkers {
    pub f0: F0Analysis,
    pub quality: VoiceQualityMeasures,
    /// Composite voice stability score, 0-100 (higher = more stable)
    pub stability_score: f32,
    pub metadata: AnalysisMetadata,
}

impl VocalBiomarkers {
    pub fn new(f0: F0Analysis, quality: VoiceQualityMeasures, metadata: AnalysisMetadata) -> Self {
        let stability_score = composite_stability_score(&f0, &quality);
        Self {
            f0,
            quality,
            stability_score,
            metadata,
        }
    }
}

/// Composite vocal stability score from clinical threshold bands.
///
/// Weighting: F0 confidence 40%, jitter 20%, shimmer 20%, HNR 20%.
/// Components with zero/absent values contribute nothing rather than
/// dragging the score down.
fn composite_stability_score(f0: &F0Analysis, quality: &VoiceQualityMeasures) -> f32 {
    let mut score = f0.confidence_ratio * 0.4;

    let jitter = quality.jitter.local;
    if jitter > 0.0 {
        let jitter_score = if jitter < 1.0 {
            100.0
        } else if jitter < 2.0 {
            80.0
        } else if jitter < 5.0 {
            (80.0 - ((jitter - 2.0) / 3.0) * 60.0).max(0.0)
        } else {
            // Pathological range
            20.0
        };
        score += jitter_score * 0.2;
    }

    let shimmer = quality.shimmer.local;
    if shimmer > 0.0 {
        let shimmer_score = if shimmer < 4.0 {
            100.0
        } else if shimmer < 6.0 {
            80.0
        } else if shimmer < 10.0 {
            (80.0 - ((shimmer - 6.0) / 4.0) * 60.0).max(0.0)
        } else {
            20.0
        };
        score += shimmer_score * 0.2;
    }

    let hnr = quality.hnr.mean;
    if hnr > 0.0 {
        let hnr_score = if hnr >= 20.0 {
            100.0
        } else if hnr >= 15.0 {
            80.0
        } else if hnr >= 10.0 {
            60.0
        } else {
            ((hnr / 10.0) * 40.0).max(0.0)
        };
        score += hnr_score * 0.2;
    }

    score.clamp(0.0, 100.0)
}

#[cfg(test)]
pub(crate) fn healthy_quality_measures() -> VoiceQualityMeasures {
    VoiceQualityMeasures {
        jitter: JitterMeasures {
            local: 0.5,
            absolute: 40.0,
            rap: 0.3,
            ppq5: 0.4,
        },
        shimmer: ShimmerMeasures {
            local: 2.5,
            db: 0.3,
            apq3: 1.5,
            apq5: 2.0,
        },
        hnr: HnrMeasures { mean: 22.0, std: 2.5 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stability_level_from_f0() {
        // 200 Hz mean, 5 Hz std: CV 0.025, high stability
        assert_eq!(StabilityLevel::from_f0(200.0, 5.0), StabilityLevel::High);
        // CV 0.10: medium
        assert_eq!(StabilityLevel::from_f0(200.0, 20.0), StabilityLevel::Medium);
        // CV 0.25: low
        assert_eq!(StabilityLevel::from_f0(200.0, 50.0), StabilityLevel::Low);
    }

    #[test]
    fn test_stability_level_zero_mean_is_low() {
        assert_eq!(StabilityLevel::from_f0(0.0, 0.0), StabilityLevel::Low);
    }

    #[test]
    fn test_f0_within_range() {
        use crate::biomarkers::demographics::VoiceDemographic;
        use crate::biomarkers::thresholds::ClinicalThresholdsProvider;

        let provider = ClinicalThresholdsProvider::new();
        let thresholds = provider.thresholds(VoiceDemographic::AdultFemale);

        let inside = F0Analysis::new(200.0, 10.0, 80.0);
        assert!(inside.within_range(thresholds));

        let below = F0Analysis::new(100.0, 10.0, 80.0);
        assert!(!below.within_range(thresholds));
    }

    #[test]
    fn test_composite_score_healthy_voice() {
        // Confident F0, excellent jitter/shimmer/HNR: 40 + 20 + 20 + 20
        let f0 = F0Analysis::new(200.0, 4.0, 100.0);
        let biomarkers = VocalBiomarkers::new(
            f0,
            healthy_quality_measures(),
            AnalysisMetadata {
                voiced_ratio: 0.9,
                recording_duration_seconds: 5.0,
                frame_count: 500,
                voiced_frame_count: 450,
            },
        );
        assert!((biomarkers.stability_score - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_composite_score_pathological_jitter() {
        let f0 = F0Analysis::new(200.0, 4.0, 100.0);
        let mut quality = healthy_quality_measures();
        quality.jitter.local = 6.0; // pathological band scores 20

        let score = composite_stability_score(&f0, &quality);
        // 40 (confidence) + 4 (jitter) + 20 (shimmer) + 20 (hnr)
        assert!((score - 84.0).abs() < 0.01);
    }

    #[test]
    fn test_composite_score_sliding_jitter_band() {
        let f0 = F0Analysis::new(200.0, 4.0, 100.0);
        let mut quality = healthy_quality_measures();
        quality.jitter.local = 3.5; // midway through the 2-5% band: 50

        let score = composite_stability_score(&f0, &quality);
        assert!((score - (40.0 + 50.0 * 0.2 + 20.0 + 20.0)).abs() < 0.01);
    }

    #[test]
    fn test_composite_score_absent_components_contribute_nothing() {
        // Zeroed quality measures (engine could not compute them): score is
        // confidence-only, not dragged to the floor
        let f0 = F0Analysis::new(200.0, 4.0, 75.0);
        let quality = VoiceQualityMeasures {
            jitter: JitterMeasures {
                local: 0.0,
                absolute: 0.0,
                rap: 0.0,
                ppq5: 0.0,
            },
            shimmer: ShimmerMeasures {
                local: 0.0,
                db: 0.0,
                apq3: 0.0,
                apq5: 0.0,
            },
            hnr: HnrMeasures { mean: 0.0, std: 0.0 },
        };
        let score = composite_stability_score(&f0, &quality);
        assert!((score - 30.0).abs() < 0.01);
    }

    #[test]
    fn test_composite_score_poor_hnr_scaled() {
        let f0 = F0Analysis::new(200.0, 4.0, 100.0);
        let mut quality = healthy_quality_measures();
        quality.hnr.mean = 5.0; // poor range: (5/10)*40 = 20, weighted 4

        let score = composite_stability_score(&f0, &quality);
        assert!((score - (40.0 + 20.0 + 20.0 + 4.0)).abs() < 0.01);
    }

    #[test]
    fn test_biomarkers_serialization_roundtrip() {
        let biomarkers = VocalBiomarkers::new(
            F0Analysis::new(210.0, 8.0, 92.0),
            healthy_quality_measures(),
            AnalysisMetadata {
                voiced_ratio: 0.85,
                recording_duration_seconds: 4.2,
                frame_count: 420,
                voiced_frame_count: 357,
            },
        );

        let json = serde_json::to_string(&biomarkers).unwrap();
        let back: VocalBiomarkers = serde_json::from_str(&json).unwrap();
        assert_eq!(back.f0.stability_level, StabilityLevel::High);
        assert!((back.stability_score - biomarkers.stability_score).abs() < f32::EPSILON);
        assert_eq!(back.metadata.frame_count, 420);
    }
}

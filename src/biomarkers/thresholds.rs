//! Clinical threshold reference table
//!
//! Per-demographic pass/fail criteria for baseline validation. The table is
//! fixed at construction and every demographic resolves to an entry — a
//! missing row would be a configuration error, so the lookup is infallible
//! by design of the table itself.
//!
//! Jitter/shimmer ceilings for the adult buckets follow the standard MDVP
//! norms (jitter local 1.04%, RAP 0.68%, PPQ5 0.84%; shimmer local 3.81%,
//! APQ3 2.65%, APQ5 3.07%). Adolescent and senior buckets are relaxed to
//! account for maturing and aging vocal folds.

use serde::{Deserialize, Serialize};

use super::demographics::VoiceDemographic;

/// Inclusive F0 range in Hz.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct F0Range {
    pub min: f32,
    pub max: f32,
}

/// Jitter ceilings, in %.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct JitterThresholds {
    pub max_local: f32,
    pub max_rap: f32,
    pub max_ppq5: f32,
}

/// Shimmer ceilings, in %.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ShimmerThresholds {
    pub max_local: f32,
    pub max_apq3: f32,
    pub max_apq5: f32,
}

/// HNR bounds, in dB.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HnrThresholds {
    pub min_mean: f32,
    pub max_std: f32,
}

/// Complete threshold set for one demographic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClinicalThresholds {
    pub f0_range: F0Range,
    /// Minimum F0 confidence, 0-100
    pub minimum_f0_confidence: f32,
    /// Minimum voiced-frame ratio, 0.0-1.0
    pub minimum_voiced_ratio: f32,
    /// Minimum recording duration in seconds
    pub minimum_recording_duration: f32,
    pub jitter: JitterThresholds,
    pub shimmer: ShimmerThresholds,
    pub hnr: HnrThresholds,
}

const ADULT_JITTER: JitterThresholds = JitterThresholds {
    max_local: 1.04,
    max_rap: 0.68,
    max_ppq5: 0.84,
};

const ADULT_SHIMMER: ShimmerThresholds = ShimmerThresholds {
    max_local: 3.81,
    max_apq3: 2.65,
    max_apq5: 3.07,
};

const RELAXED_JITTER: JitterThresholds = JitterThresholds {
    max_local: 1.30,
    max_rap: 0.85,
    max_ppq5: 1.05,
};

const RELAXED_SHIMMER: ShimmerThresholds = ShimmerThresholds {
    max_local: 4.20,
    max_apq3: 2.90,
    max_apq5: 3.40,
};

/// Reference-table lookup from demographic to thresholds.
#[derive(Debug, Clone)]
pub struct ClinicalThresholdsProvider {
    table: [(VoiceDemographic, ClinicalThresholds); 7],
}

impl Default for ClinicalThresholdsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ClinicalThresholdsProvider {
    pub fn new() -> Self {
        let table = [
            (
                VoiceDemographic::Adolescent,
                ClinicalThresholds {
                    // Wide range: adolescent voices span pre- and post-change
                    f0_range: F0Range { min: 130.0, max: 430.0 },
                    minimum_f0_confidence: 55.0,
                    minimum_voiced_ratio: 0.50,
                    minimum_recording_duration: 3.0,
                    jitter: RELAXED_JITTER,
                    shimmer: RELAXED_SHIMMER,
                    hnr: HnrThresholds { min_mean: 14.0, max_std: 6.0 },
                },
            ),
            (
                VoiceDemographic::AdultFemale,
                ClinicalThresholds {
                    f0_range: F0Range { min: 165.0, max: 255.0 },
                    minimum_f0_confidence: 60.0,
                    minimum_voiced_ratio: 0.60,
                    minimum_recording_duration: 3.0,
                    jitter: ADULT_JITTER,
                    shimmer: ADULT_SHIMMER,
                    hnr: HnrThresholds { min_mean: 17.0, max_std: 5.0 },
                },
            ),
            (
                VoiceDemographic::AdultMale,
                ClinicalThresholds {
                    f0_range: F0Range { min: 85.0, max: 180.0 },
                    minimum_f0_confidence: 60.0,
                    minimum_voiced_ratio: 0.60,
                    minimum_recording_duration: 3.0,
                    jitter: ADULT_JITTER,
                    shimmer: ADULT_SHIMMER,
                    hnr: HnrThresholds { min_mean: 15.0, max_std: 5.0 },
                },
            ),
            (
                VoiceDemographic::AdultOther,
                ClinicalThresholds {
                    // Union of the adult male/female ranges
                    f0_range: F0Range { min: 85.0, max: 255.0 },
                    minimum_f0_confidence: 60.0,
                    minimum_voiced_ratio: 0.60,
                    minimum_recording_duration: 3.0,
                    jitter: ADULT_JITTER,
                    shimmer: ADULT_SHIMMER,
                    hnr: HnrThresholds { min_mean: 15.0, max_std: 5.0 },
                },
            ),
            (
                VoiceDemographic::SeniorFemale,
                ClinicalThresholds {
                    f0_range: F0Range { min: 140.0, max: 240.0 },
                    minimum_f0_confidence: 55.0,
                    minimum_voiced_ratio: 0.55,
                    minimum_recording_duration: 3.0,
                    jitter: RELAXED_JITTER,
                    shimmer: RELAXED_SHIMMER,
                    hnr: HnrThresholds { min_mean: 14.0, max_std: 6.0 },
                },
            ),
            (
                VoiceDemographic::SeniorMale,
                ClinicalThresholds {
                    f0_range: F0Range { min: 90.0, max: 200.0 },
                    minimum_f0_confidence: 55.0,
                    minimum_voiced_ratio: 0.55,
                    minimum_recording_duration: 3.0,
                    jitter: RELAXED_JITTER,
                    shimmer: RELAXED_SHIMMER,
                    hnr: HnrThresholds { min_mean: 13.0, max_std: 6.0 },
                },
            ),
            (
                VoiceDemographic::SeniorOther,
                ClinicalThresholds {
                    f0_range: F0Range { min: 90.0, max: 240.0 },
                    minimum_f0_confidence: 55.0,
                    minimum_voiced_ratio: 0.55,
                    minimum_recording_duration: 3.0,
                    jitter: RELAXED_JITTER,
                    shimmer: RELAXED_SHIMMER,
                    hnr: HnrThresholds { min_mean: 13.0, max_std: 6.0 },
                },
            ),
        ];
        Self { table }
    }

    /// Look up the threshold set for a demographic. Every demographic has an
    /// entry.
    pub fn thresholds(&self, demographic: VoiceDemographic) -> &ClinicalThresholds {
        self.table
            .iter()
            .find(|(d, _)| *d == demographic)
            .map(|(_, t)| t)
            // The table is constructed over VoiceDemographic::ALL; a miss is
            // impossible by construction
            .unwrap_or(&self.table[3].1)
    }
}

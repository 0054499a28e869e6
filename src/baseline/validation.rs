//! Baseline validation engine
//!
//! Scores a completed analysis against the demographic's clinical
//! thresholds. Every check runs — failures accumulate rather than
//! short-circuiting, so a rejection names every threshold the recording
//! missed. A rejection here is not an error: the biomarkers are sound, they
//! just do not qualify as a baseline.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::biomarkers::demographics::VoiceDemographic;
use crate::biomarkers::thresholds::ClinicalThresholdsProvider;
use crate::biomarkers::VocalBiomarkers;

/// Total number of independent validation checks.
pub const CHECK_COUNT: usize = 12;

/// One failed validation check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckFailure {
    /// Stable check name, e.g. "duration", "jitter_local"
    pub check: String,
    /// Human-readable detail with the measured and threshold values
    pub detail: String,
}

/// Result of validating biomarkers against clinical thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ValidationOutcome {
    /// All checks passed. Confidence is passed/total × 100 — for display,
    /// not pass/fail
    Accepted { confidence: f32 },
    /// One or more checks failed; every failure is listed
    Rejected { failures: Vec<CheckFailure> },
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted { .. })
    }

    /// Failed check names, empty when accepted.
    pub fn failed_checks(&self) -> Vec<String> {
        match self {
            ValidationOutcome::Accepted { .. } => Vec::new(),
            ValidationOutcome::Rejected { failures } => {
                failures.iter().map(|f| f.check.clone()).collect()
            }
        }
    }

    /// Joined rejection reason, `None` when accepted.
    pub fn reason(&self) -> Option<String> {
        match self {
            ValidationOutcome::Accepted { .. } => None,
            ValidationOutcome::Rejected { failures } => Some(
                failures
                    .iter()
                    .map(|f| f.detail.as_str())
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
        }
    }
}

/// Validates biomarkers against per-demographic clinical thresholds.
#[derive(Debug, Clone, Default)]
pub struct BaselineValidationEngine {
    provider: ClinicalThresholdsProvider,
}

impl BaselineValidationEngine {
    pub fn new(provider: ClinicalThresholdsProvider) -> Self {
        Self { provider }
    }

    /// Run all checks. Independent: failing one never masks another.
    pub fn validate(
        &self,
        biomarkers: &VocalBiomarkers,
        demographic: VoiceDemographic,
    ) -> ValidationOutcome {
        let t = self.provider.thresholds(demographic);
        let mut failures = Vec::new();

        let mut check = |name: &str, passed: bool, detail: String| {
            if !passed {
                failures.push(CheckFailure {
                    check: name.to_string(),
                    detail,
                });
            }
        };

        let f0 = &biomarkers.f0;
        check(
            "f0_confidence",
            f0.confidence_ratio >= t.minimum_f0_confidence,
            format!(
                "f0_confidence {:.1} below minimum {:.1}",
                f0.confidence_ratio, t.minimum_f0_confidence
            ),
        );
        check(
            "f0_range",
            f0.within_range(t),
            format!(
                "f0_range: mean {:.1} Hz outside [{:.1}, {:.1}] Hz",
                f0.mean, t.f0_range.min, t.f0_range.max
            ),
        );

        let meta = &biomarkers.metadata;
        check(
            "voiced_ratio",
            meta.voiced_ratio >= t.minimum_voiced_ratio,
            format!(
                "voiced_ratio {:.2} below minimum {:.2}",
                meta.voiced_ratio, t.minimum_voiced_ratio
            ),
        );
        check(
            "duration",
            meta.recording_duration_seconds >= t.minimum_recording_duration,
            format!(
                "duration {:.1}s below minimum {:.1}s",
                meta.recording_duration_seconds, t.minimum_recording_duration
            ),
        );

        let jitter = &biomarkers.quality.jitter;
        check(
            "jitter_local",
            jitter.local <= t.jitter.max_local,
            format!(
                "jitter_local {:.2}% above maximum {:.2}%",
                jitter.local, t.jitter.max_local
            ),
        );
        check(
            "jitter_rap",
            jitter.rap <= t.jitter.max_rap,
            format!(
                "jitter_rap {:.2}% above maximum {:.2}%",
                jitter.rap, t.jitter.max_rap
            ),
        );
        check(
            "jitter_ppq5",
            jitter.ppq5 <= t.jitter.max_ppq5,
            format!(
                "jitter_ppq5 {:.2}% above maximum {:.2}%",
                jitter.ppq5, t.jitter.max_ppq5
            ),
        );

        let shimmer = &biomarkers.quality.shimmer;
        check(
            "shimmer_local",
            shimmer.local <= t.shimmer.max_local,
            format!(
                "shimmer_local {:.2}% above maximum {:.2}%",
                shimmer.local, t.shimmer.max_local
            ),
        );
        check(
            "shimmer_apq3",
            shimmer.apq3 <= t.shimmer.max_apq3,
            format!(
                "shimmer_apq3 {:.2}% above maximum {:.2}%",
                shimmer.apq3, t.shimmer.max_apq3
            ),
        );
        check(
            "shimmer_apq5",
            shimmer.apq5 <= t.shimmer.max_apq5,
            format!(
                "shimmer_apq5 {:.2}% above maximum {:.2}%",
                shimmer.apq5, t.shimmer.max_apq5
            ),
        );

        let hnr = &biomarkers.quality.hnr;
        check(
            "hnr_mean",
            hnr.mean >= t.hnr.min_mean,
            format!(
                "hnr_mean {:.1} dB below minimum {:.1} dB",
                hnr.mean, t.hnr.min_mean
            ),
        );
        check(
            "hnr_std",
            hnr.std <= t.hnr.max_std,
            format!(
                "hnr_std {:.1} dB above maximum {:.1} dB",
                hnr.std, t.hnr.max_std
            ),
        );

        if failures.is_empty() {
            ValidationOutcome::Accepted { confidence: 100.0 }
        } else {
            let passed = CHECK_COUNT - failures.len();
            debug!(
                "Validation rejected ({}/{} checks passed): {}",
                passed,
                CHECK_COUNT,
                failures
                    .iter()
                    .map(|f| f.check.as_str())
                    .collect::<Vec<_>>()
                    .join(",")
            );
            ValidationOutcome::Rejected { failures }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biomarkers::{healthy_quality_measures, AnalysisMetadata, F0Analysis};

    /// Biomarkers that pass every AdultFemale check
    fn passing_biomarkers() -> VocalBiomarkers {
        VocalBiomarkers::new(
            F0Analysis::new(200.0, 6.0, 90.0),
            healthy_quality_measures(),
            AnalysisMetadata {
                voiced_ratio: 0.85,
                recording_duration_seconds: 5.0,
                frame_count: 500,
                voiced_frame_count: 425,
            },
        )
    }

    fn engine() -> BaselineValidationEngine {
        BaselineValidationEngine::default()
    }

    #[test]
    fn test_all_checks_passing_yields_confidence_100() {
        let outcome = engine().validate(&passing_biomarkers(), VoiceDemographic::AdultFemale);
        match outcome {
            ValidationOutcome::Accepted { confidence } => {
                assert!((confidence - 100.0).abs() < f32::EPSILON)
            }
            ValidationOutcome::Rejected { failures } => {
                panic!("expected acceptance, got {:?}", failures)
            }
        }
    }

    #[test]
    fn test_short_duration_rejected_with_duration_named() {
        let mut biomarkers = passing_biomarkers();
        biomarkers.metadata.recording_duration_seconds = 2.0;

        let outcome = engine().validate(&biomarkers, VoiceDemographic::AdultFemale);
        assert!(!outcome.is_accepted());
        assert_eq!(outcome.failed_checks(), vec!["duration"]);
        assert!(outcome.reason().unwrap().contains("duration"));
    }

    #[test]
    fn test_jitter_failure_not_masked_by_passing_checks() {
        // jitter_local 1.2% over the 1.04% ceiling; everything else passes
        let mut biomarkers = passing_biomarkers();
        biomarkers.quality.jitter.local = 1.2;

        let outcome = engine().validate(&biomarkers, VoiceDemographic::AdultFemale);
        assert_eq!(outcome.failed_checks(), vec!["jitter_local"]);
        assert!(outcome.reason().unwrap().contains("jitter_local"));
    }

    #[test]
    fn test_multiple_failures_all_listed() {
        let mut biomarkers = passing_biomarkers();
        biomarkers.metadata.recording_duration_seconds = 1.0;
        biomarkers.quality.hnr.mean = 5.0;
        biomarkers.quality.shimmer.apq3 = 9.0;

        let outcome = engine().validate(&biomarkers, VoiceDemographic::AdultFemale);
        let failed = outcome.failed_checks();
        assert_eq!(failed.len(), 3);
        assert!(failed.contains(&"duration".to_string()));
        assert!(failed.contains(&"hnr_mean".to_string()));
        assert!(failed.contains(&"shimmer_apq3".to_string()));
    }

    #[test]
    fn test_each_single_check_failure_names_exactly_that_check() {
        let cases: Vec<(&str, Box<dyn Fn(&mut VocalBiomarkers)>)> = vec![
            ("f0_confidence", Box::new(|b| b.f0.confidence_ratio = 10.0)),
            ("f0_range", Box::new(|b| b.f0.mean = 300.0)),
            ("voiced_ratio", Box::new(|b| b.metadata.voiced_ratio = 0.2)),
            (
                "duration",
                Box::new(|b| b.metadata.recording_duration_seconds = 1.0),
            ),
            ("jitter_local", Box::new(|b| b.quality.jitter.local = 2.0)),
            ("jitter_rap", Box::new(|b| b.quality.jitter.rap = 1.0)),
            ("jitter_ppq5", Box::new(|b| b.quality.jitter.ppq5 = 1.5)),
            ("shimmer_local", Box::new(|b| b.quality.shimmer.local = 5.0)),
            ("shimmer_apq3", Box::new(|b| b.quality.shimmer.apq3 = 4.0)),
            ("shimmer_apq5", Box::new(|b| b.quality.shimmer.apq5 = 4.0)),
            ("hnr_mean", Box::new(|b| b.quality.hnr.mean = 10.0)),
            ("hnr_std", Box::new(|b| b.quality.hnr.std = 8.0)),
        ];
        assert_eq!(cases.len(), CHECK_COUNT);

        for (expected, mutate) in cases {
            let mut biomarkers = passing_biomarkers();
            mutate(&mut biomarkers);
            let outcome = engine().validate(&biomarkers, VoiceDemographic::AdultFemale);
            assert_eq!(
                outcome.failed_checks(),
                vec![expected],
                "check {} should be the only failure",
                expected
            );
        }
    }

    #[test]
    fn test_senior_demographic_accepts_relaxed_jitter() {
        // 1.2% jitter fails AdultFemale but passes the relaxed SeniorFemale
        // ceiling
        let mut biomarkers = passing_biomarkers();
        biomarkers.quality.jitter.local = 1.2;
        biomarkers.f0.mean = 180.0; // inside both F0 ranges

        let adult = engine().validate(&biomarkers, VoiceDemographic::AdultFemale);
        assert!(!adult.is_accepted());

        let senior = engine().validate(&biomarkers, VoiceDemographic::SeniorFemale);
        assert!(senior.is_accepted());
    }

    #[test]
    fn test_accepted_outcome_has_no_reason() {
        let outcome = engine().validate(&passing_biomarkers(), VoiceDemographic::AdultFemale);
        assert!(outcome.reason().is_none());
        assert!(outcome.failed_checks().is_empty());
    }
}

//! External engine feature-map parsing
//!
//! The external analysis engine returns a flat numeric map keyed by feature
//! name. Mapping it into [`VocalBiomarkers`] is a pure parsing step with a
//! fixed set of required keys — a missing or non-finite value is a parse
//! error naming the offending key, never a partial success.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    AnalysisMetadata, F0Analysis, HnrMeasures, JitterMeasures, ShimmerMeasures,
    VoiceQualityMeasures, VocalBiomarkers,
};

/// Flat numeric feature map as delivered by the engine.
pub type FeatureMap = HashMap<String, f64>;

/// Required keys, matching the engine's extractor output.
pub const REQUIRED_KEYS: [&str; 16] = [
    "f0_mean",
    "f0_std",
    "f0_confidence",
    "jitter_local",
    "jitter_absolute",
    "jitter_rap",
    "jitter_ppq5",
    "shimmer_local",
    "shimmer_db",
    "shimmer_apq3",
    "shimmer_apq5",
    "hnr_mean",
    "hnr_std",
    "voiced_ratio",
    "frame_count",
    "voiced_frame_count",
];

/// Feature-map parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum FeatureMapError {
    #[error("missing required feature key: {0}")]
    MissingKey(String),
    #[error("non-finite value for feature key: {0}")]
    NonFinite(String),
}

fn required(map: &FeatureMap, key: &str) -> Result<f64, FeatureMapError> {
    let value = map
        .get(key)
        .copied()
        .ok_or_else(|| FeatureMapError::MissingKey(key.to_string()))?;
    if !value.is_finite() {
        return Err(FeatureMapError::NonFinite(key.to_string()));
    }
    Ok(value)
}

impl VocalBiomarkers {
    /// Parse an engine feature map into a biomarker set.
    ///
    /// `recording_duration_seconds` comes from the sample metadata captured
    /// at upload time; the engine does not echo it back.
    pub fn from_feature_map(
        map: &FeatureMap,
        recording_duration_seconds: f32,
    ) -> Result<Self, FeatureMapError> {
        // Validate every key up front so the error names the first gap in a
        // stable order rather than struct-field order
        for key in REQUIRED_KEYS {
            required(map, key)?;
        }

        let f0 = F0Analysis::new(
            required(map, "f0_mean")? as f32,
            required(map, "f0_std")? as f32,
            required(map, "f0_confidence")? as f32,
        );

        let quality = VoiceQualityMeasures {
            jitter: JitterMeasures {
                local: required(map, "jitter_local")? as f32,
                absolute: required(map, "jitter_absolute")? as f32,
                rap: required(map, "jitter_rap")? as f32,
                ppq5: required(map, "jitter_ppq5")? as f32,
            },
            shimmer: ShimmerMeasures {
                local: required(map, "shimmer_local")? as f32,
                db: required(map, "shimmer_db")? as f32,
                apq3: required(map, "shimmer_apq3")? as f32,
                apq5: required(map, "shimmer_apq5")? as f32,
            },
            hnr: HnrMeasures {
                mean: required(map, "hnr_mean")? as f32,
                std: required(map, "hnr_std")? as f32,
            },
        };

        let metadata = AnalysisMetadata {
            voiced_ratio: required(map, "voiced_ratio")? as f32,
            recording_duration_seconds,
            frame_count: required(map, "frame_count")?.max(0.0) as u32,
            voiced_frame_count: required(map, "voiced_frame_count")?.max(0.0) as u32,
        };

        Ok(VocalBiomarkers::new(f0, quality, metadata))
    }
}

#[cfg(test)]
pub(crate) fn complete_feature_map() -> FeatureMap {
    let mut map = FeatureMap::new();
    map.insert("f0_mean".into(), 205.3);
    map.insert("f0_std".into(), 6.8);
    map.insert("f0_confidence".into(), 88.0);
    map.insert("jitter_local".into(), 0.62);
    map.insert("jitter_absolute".into(), 41.5);
    map.insert("jitter_rap".into(), 0.35);
    map.insert("jitter_ppq5".into(), 0.41);
    map.insert("shimmer_local".into(), 2.9);
    map.insert("shimmer_db".into(), 0.31);
    map.insert("shimmer_apq3".into(), 1.6);
    map.insert("shimmer_apq5".into(), 2.1);
    map.insert("hnr_mean".into(), 21.4);
    map.insert("hnr_std".into(), 2.7);
    map.insert("voiced_ratio".into(), 0.88);
    map.insert("frame_count".into(), 412.0);
    map.insert("voiced_frame_count".into(), 363.0);
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biomarkers::StabilityLevel;

    #[test]
    fn test_parse_complete_map() {
        let map = complete_feature_map();
        let biomarkers = VocalBiomarkers::from_feature_map(&map, 4.1).unwrap();

        assert!((biomarkers.f0.mean - 205.3).abs() < 0.01);
        assert_eq!(biomarkers.f0.stability_level, StabilityLevel::High);
        assert!((biomarkers.quality.jitter.local - 0.62).abs() < 0.01);
        assert!((biomarkers.quality.hnr.mean - 21.4).abs() < 0.01);
        assert_eq!(biomarkers.metadata.frame_count, 412);
        assert_eq!(biomarkers.metadata.voiced_frame_count, 363);
        assert!((biomarkers.metadata.recording_duration_seconds - 4.1).abs() < 0.001);
    }

    #[test]
    fn test_missing_key_is_a_parse_error() {
        let mut map = complete_feature_map();
        map.remove("shimmer_apq3");

        let err = VocalBiomarkers::from_feature_map(&map, 4.0).unwrap_err();
        assert_eq!(err, FeatureMapError::MissingKey("shimmer_apq3".into()));
        assert!(err.to_string().contains("shimmer_apq3"));
    }

    #[test]
    fn test_every_required_key_is_enforced() {
        for key in REQUIRED_KEYS {
            let mut map = complete_feature_map();
            map.remove(key);
            let err = VocalBiomarkers::from_feature_map(&map, 4.0).unwrap_err();
            assert_eq!(err, FeatureMapError::MissingKey(key.into()), "key {}", key);
        }
    }

    #[test]
    fn test_non_finite_value_rejected() {
        let mut map = complete_feature_map();
        map.insert("hnr_mean".into(), f64::NAN);

        let err = VocalBiomarkers::from_feature_map(&map, 4.0).unwrap_err();
        assert_eq!(err, FeatureMapError::NonFinite("hnr_mean".into()));
    }

    #[test]
    fn test_extra_keys_ignored() {
        let mut map = complete_feature_map();
        map.insert("vocal_stability_score".into(), 91.0);
        map.insert("experimental_cpp".into(), 14.2);

        // Extra engine features don't break parsing; the composite score is
        // recomputed locally, not trusted from the wire
        let biomarkers = VocalBiomarkers::from_feature_map(&map, 4.0).unwrap();
        assert!(biomarkers.stability_score > 0.0);
    }

    #[test]
    fn test_feature_map_deserializes_from_engine_json() {
        let json = serde_json::to_string(&complete_feature_map()).unwrap();
        let map: FeatureMap = serde_json::from_str(&json).unwrap();
        assert!(VocalBiomarkers::from_feature_map(&map, 3.5).is_ok());
    }
}

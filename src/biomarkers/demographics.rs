//! Demographic categories for threshold selection
//!
//! Clinical voice thresholds differ by age band and gender identity. The
//! mapping is deterministic: age bracket first, then gender within the adult
//! and senior brackets. Ages outside 13-120 fall back to `AdultOther` (legacy
//! behavior, kept intentionally).

use serde::{Deserialize, Serialize};

/// Self-reported gender identity from the user profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenderIdentity {
    Woman,
    Man,
    Other,
}

/// Age/gender-derived bucket used to select clinically appropriate
/// thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VoiceDemographic {
    Adolescent,
    AdultFemale,
    AdultMale,
    AdultOther,
    SeniorFemale,
    SeniorMale,
    SeniorOther,
}

impl VoiceDemographic {
    /// Resolve the demographic bucket from (age, gender identity).
    ///
    /// 13-17 is adolescent regardless of gender; 18-64 adult; 65-120 senior.
    pub fn from_profile(age: u32, gender: GenderIdentity) -> Self {
        match age {
            13..=17 => VoiceDemographic::Adolescent,
            18..=64 => match gender {
                GenderIdentity::Woman => VoiceDemographic::AdultFemale,
                GenderIdentity::Man => VoiceDemographic::AdultMale,
                GenderIdentity::Other => VoiceDemographic::AdultOther,
            },
            65..=120 => match gender {
                GenderIdentity::Woman => VoiceDemographic::SeniorFemale,
                GenderIdentity::Man => VoiceDemographic::SeniorMale,
                GenderIdentity::Other => VoiceDemographic::SeniorOther,
            },
            // Out-of-range ages (legacy records, onboarding placeholder
            // values) resolve to the broadest adult bucket
            _ => VoiceDemographic::AdultOther,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceDemographic::Adolescent => "adolescent",
            VoiceDemographic::AdultFemale => "adultFemale",
            VoiceDemographic::AdultMale => "adultMale",
            VoiceDemographic::AdultOther => "adultOther",
            VoiceDemographic::SeniorFemale => "seniorFemale",
            VoiceDemographic::SeniorMale => "seniorMale",
            VoiceDemographic::SeniorOther => "seniorOther",
        }
    }

    /// Every demographic value, for table completeness checks.
    pub const ALL: [VoiceDemographic; 7] = [
        VoiceDemographic::Adolescent,
        VoiceDemographic::AdultFemale,
        VoiceDemographic::AdultMale,
        VoiceDemographic::AdultOther,
        VoiceDemographic::SeniorFemale,
        VoiceDemographic::SeniorMale,
        VoiceDemographic::SeniorOther,
    ];
}

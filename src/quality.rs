//! Signal quality gate
//!
//! Pre-analysis decision over the recording's aggregate RMS: reject
//! recordings with no usable signal, flag marginal ones so downstream
//! confidence is discounted, pass the rest. The gate is a pure function —
//! short-circuiting the pipeline on rejection is the caller's job.
//!
//! Two floors per capture context:
//! - `minimum_rms` — hard floor; below it the recording is rejected outright.
//! - `warning_recovery_rms` — soft ceiling; at or above the hard floor but
//!   below this point the recording is analyzable with degraded confidence.
//!
//! Simulator floors are roughly half of device floors; simulated microphones
//! produce systematically lower signal energy.

use serde::{Deserialize, Serialize};

use crate::audio::CaptureContext;

/// Multiplier applied to the local confidence score when the gate reports
/// a degraded signal (fixed 30% penalty).
pub const DEGRADED_CONFIDENCE_PENALTY: f32 = 0.7;

/// Outcome of the quality gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalQuality {
    /// Signal below the hard floor; not worth analyzing
    Reject,
    /// Analyzable, but confidence is discounted downstream
    Degraded,
    Normal,
}

impl SignalQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalQuality::Reject => "reject",
            SignalQuality::Degraded => "degraded",
            SignalQuality::Normal => "normal",
        }
    }
}

/// RMS floors for one capture context.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContextFloors {
    /// Hard floor: reject below this
    pub minimum_rms: f32,
    /// Recovery point: degraded below this, normal at or above
    pub warning_recovery_rms: f32,
}

/// The quality gate. Stateless; floors are fixed at construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityGate {
    pub device: ContextFloors,
    pub simulator: ContextFloors,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            device: ContextFloors {
                minimum_rms: 0.006,
                warning_recovery_rms: 0.010,
            },
            simulator: ContextFloors {
                minimum_rms: 0.003,
                warning_recovery_rms: 0.005,
            },
        }
    }
}

impl QualityGate {
    pub fn new(device: ContextFloors, simulator: ContextFloors) -> Self {
        Self { device, simulator }
    }

    /// Evaluate a recording's aggregate RMS against the context's floors.
    pub fn evaluate(&self, rms: f32, context: CaptureContext) -> SignalQuality {
        let floors = match context {
            CaptureContext::Device => self.device,
            CaptureContext::Simulator => self.simulator,
        };

        if rms < floors.minimum_rms {
            SignalQuality::Reject
        } else if rms < floors.warning_recovery_rms {
            SignalQuality::Degraded
        } else {
            SignalQuality::Normal
        }
    }
}

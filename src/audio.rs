//! Captured-recording input model
//!
//! An [`AudioSample`] is produced by the capture collaborator and handed to
//! this core read-only. It carries the mono PCM buffer (for the local
//! estimator and the engine upload) alongside the signal statistics the
//! quality gate consumes.

use serde::{Deserialize, Serialize};

/// Where the recording was captured.
///
/// Simulated microphones produce systematically lower signal energy, so the
/// quality gate applies different floors per context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureContext {
    Device,
    Simulator,
}

/// A captured voice recording, immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSample {
    /// Recording length in seconds
    pub duration_seconds: f32,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Bits per sample as encoded by the capture layer
    pub bit_depth: u16,
    /// Number of channels in the original capture (PCM here is already mono)
    pub channel_count: u16,
    /// Per-frame signal power, ordered by frame time
    pub frame_powers: Vec<f32>,
    /// Aggregate RMS over the whole recording
    pub rms: f32,
    /// Mono PCM samples, normalized to [-1.0, 1.0]
    #[serde(skip)]
    pub samples: Vec<f32>,
}

impl AudioSample {
    /// Build a sample from a mono PCM buffer, deriving frame powers and RMS.
    ///
    /// Frame power is computed over 10 ms windows to match the engine's
    /// analysis time step.
    pub fn from_pcm(samples: Vec<f32>, sample_rate: u32, bit_depth: u16, channel_count: u16) -> Self {
        let duration_seconds = if sample_rate > 0 {
            samples.len() as f32 / sample_rate as f32
        } else {
            0.0
        };

        let frame_len = (sample_rate as usize / 100).max(1);
        let frame_powers: Vec<f32> = samples
            .chunks(frame_len)
            .map(|frame| frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32)
            .collect();

        let rms = if samples.is_empty() {
            0.0
        } else {
            (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
        };

        Self {
            duration_seconds,
            sample_rate,
            bit_depth,
            channel_count,
            frame_powers,
            rms,
            samples,
        }
    }
}

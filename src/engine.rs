//! External analysis engine upload client
//!
//! The engine is an opaque collaborator: it accepts an audio blob plus
//! sample metadata and later emits a flat feature map out-of-band (see
//! `subscription`). This module provides the upload seam — the
//! [`AnalysisUploader`] trait the orchestrator retries against — and a
//! reqwest implementation.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::audio::AudioSample;

/// Timeout for one upload request
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Upload failure. `retryable` distinguishes transport glitches (worth
/// another attempt) from terminal rejections.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct UploadError {
    pub message: String,
    pub retryable: bool,
}

impl UploadError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Upload seam consumed by the orchestrator.
#[async_trait]
pub trait AnalysisUploader: Send + Sync {
    /// Ship the recording to the engine. Retries are the caller's job.
    async fn upload(&self, recording_id: Uuid, sample: &AudioSample) -> Result<(), UploadError>;
}

/// Sample metadata shipped alongside the audio blob.
#[derive(Debug, Clone, Serialize)]
struct UploadMetadata {
    recording_id: Uuid,
    duration_seconds: f32,
    sample_rate: u32,
    bit_depth: u16,
    channel_count: u16,
}

/// Check if a reqwest error is retryable (transient network issues)
fn is_retryable_error(err: &reqwest::Error) -> bool {
    if err.is_connect() || err.is_timeout() {
        return true;
    }
    if let Some(status) = err.status() {
        return status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
    }
    false
}

/// Check if an HTTP status code is retryable
fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}

/// HTTP client for the external analysis engine.
#[derive(Debug, Clone)]
pub struct EngineClient {
    client: reqwest::Client,
    base_url: String,
}

impl EngineClient {
    /// Create a new engine client with URL validation.
    pub fn new(base_url: &str) -> Result<Self, String> {
        let cleaned_url = base_url.trim_end_matches('/');

        let parsed = reqwest::Url::parse(cleaned_url)
            .map_err(|e| format!("Invalid engine URL '{}': {}", cleaned_url, e))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(format!(
                "Engine URL must be http or https, got '{}'",
                parsed.scheme()
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: cleaned_url.to_string(),
        })
    }

    fn upload_url(&self) -> String {
        format!("{}/v1/analyses", self.base_url)
    }
}

#[async_trait]
impl AnalysisUploader for EngineClient {
    async fn upload(&self, recording_id: Uuid, sample: &AudioSample) -> Result<(), UploadError> {
        let metadata = UploadMetadata {
            recording_id,
            duration_seconds: sample.duration_seconds,
            sample_rate: sample.sample_rate,
            bit_depth: sample.bit_depth,
            channel_count: sample.channel_count,
        };
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|e| UploadError::rejected(format!("metadata encoding failed: {}", e)))?;

        // Little-endian f32 PCM; the engine resamples/converts on its side
        let mut pcm_bytes = Vec::with_capacity(sample.samples.len() * 4);
        for s in &sample.samples {
            pcm_bytes.extend_from_slice(&s.to_le_bytes());
        }

        let form = reqwest::multipart::Form::new()
            .text("metadata", metadata_json)
            .part(
                "audio",
                reqwest::multipart::Part::bytes(pcm_bytes)
                    .file_name(format!("{}.pcm", recording_id))
                    .mime_str("application/octet-stream")
                    .map_err(|e| UploadError::rejected(format!("invalid mime: {}", e)))?,
            );

        debug!("Uploading recording {} to {}", recording_id, self.upload_url());

        let response = self
            .client
            .post(self.upload_url())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if is_retryable_error(&e) {
                    UploadError::transport(e.to_string())
                } else {
                    UploadError::rejected(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if is_retryable_status(status) {
            Err(UploadError::transport(format!(
                "engine returned {}",
                status
            )))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(UploadError::rejected(format!(
                "engine rejected upload ({}): {}",
                status, body
            )))
        }
    }
}

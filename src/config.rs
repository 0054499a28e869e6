use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::quality::QualityGate;

/// Local estimator limits
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Wall-time budget for the local phase, in seconds
    pub budget_secs: u64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self { budget_secs: 5 }
    }
}

/// Cloud phase policy: upload retries and result wait bound
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Maximum upload attempts before a transport failure surfaces
    pub upload_max_retries: u32,
    /// Upper bound on waiting for the engine result, in seconds
    pub result_timeout_secs: u64,
    /// Base URL of the external analysis engine
    pub engine_base_url: Option<String>,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            upload_max_retries: 3,
            result_timeout_secs: 120,
            engine_base_url: None,
        }
    }
}

/// Runtime configuration for the analysis core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub schema_version: u32,
    pub quality: QualityGate,
    pub estimator: EstimatorConfig,
    pub cloud: CloudConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            quality: QualityGate::default(),
            estimator: EstimatorConfig::default(),
            cloud: CloudConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Get the default config directory
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".voicebiomarkers"))
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default path or return default
    pub fn load_or_default() -> Self {
        match Self::config_path().and_then(|p| Self::load_from(&p)) {
            Ok(config) => config,
            Err(e) => {
                debug!("Failed to load config, using default: {}", e);
                Self::default()
            }
        }
    }

    /// Load config from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: AnalysisConfig = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AnalysisConfig::default();
        assert_eq!(config.schema_version, 1);
        assert_eq!(config.estimator.budget_secs, 5);
        assert_eq!(config.cloud.upload_max_retries, 3);
        assert_eq!(config.cloud.result_timeout_secs, 120);
        assert!(config.cloud.engine_base_url.is_none());
    }

    #[test]
    fn test_default_gate_floors() {
        let config = AnalysisConfig::default();
        assert_eq!(config.quality.simulator.minimum_rms, 0.003);
        assert_eq!(config.quality.simulator.warning_recovery_rms, 0.005);
        assert!(config.quality.device.minimum_rms > config.quality.simulator.minimum_rms);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = AnalysisConfig::default();
        config.cloud.upload_max_retries = 5;
        config.cloud.engine_base_url = Some("http://localhost:9090".to_string());
        config.save_to(&path).unwrap();

        let loaded = AnalysisConfig::load_from(&path).unwrap();
        assert_eq!(loaded.cloud.upload_max_retries, 5);
        assert_eq!(
            loaded.cloud.engine_base_url.as_deref(),
            Some("http://localhost:9090")
        );
    }

    #[test]
    fn test_load_from_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = AnalysisConfig::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.schema_version, 1);
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("config.json");

        AnalysisConfig::default().save_to(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_config_path_ends_with_json() {
        let path = AnalysisConfig::config_path().unwrap();
        assert!(path.to_string_lossy().ends_with("config.json"));
        assert!(path.to_string_lossy().contains(".voicebiomarkers"));
    }
}

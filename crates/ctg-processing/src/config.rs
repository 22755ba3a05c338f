//! Configuration management for session preparation

use crate::features::FeatureConfig;
use crate::resample::ResampleParams;
use ctg_core::{config_error, CtgError, CtgResult};
use ctg_ingest::FragmentColumns;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Parameters that determine a prepared session
///
/// Two preparations with equal parameters for the same session produce the
/// same result, which is what the session cache relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepareParams {
    /// Output sample rate (Hz)
    pub sample_rate: f64,
    /// Median filter kernel (odd)
    pub median_kernel: usize,
    /// EMA baseline span (samples)
    pub ema_span: usize,
    /// Source gaps longer than this are reported as bridged (s)
    pub interp_limit_s: f64,
    /// Missing runs longer than this are reported (s)
    pub gap_warn_s: f64,
    /// Spike threshold in standard deviations
    pub spike_threshold: f64,
    /// Savitzky-Golay window (odd)
    pub smooth_window: usize,
    /// Savitzky-Golay polynomial order
    pub smooth_polyorder: usize,
}

impl Default for PrepareParams {
    fn default() -> Self {
        Self {
            sample_rate: 4.0,
            median_kernel: 3,
            ema_span: 20,
            interp_limit_s: 5.0,
            gap_warn_s: 10.0,
            spike_threshold: 4.0,
            smooth_window: 7,
            smooth_polyorder: 2,
        }
    }
}

impl PrepareParams {
    /// Same parameters with another sample rate
    pub fn with_sample_rate(&self, sample_rate: f64) -> Self {
        Self {
            sample_rate,
            ..self.clone()
        }
    }

    pub fn resample_params(&self) -> ResampleParams {
        ResampleParams {
            sample_rate: self.sample_rate,
            interp_limit_s: self.interp_limit_s,
            gap_warn_s: self.gap_warn_s,
        }
    }

    /// Validate parameters
    pub fn validate(&self) -> CtgResult<()> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(config_error!("Sample rate must be positive, got {}", self.sample_rate));
        }

        if self.median_kernel == 0 || self.median_kernel % 2 == 0 {
            return Err(config_error!("Median kernel must be a positive odd number, got {}", self.median_kernel));
        }

        if self.ema_span == 0 {
            return Err(config_error!("EMA span must be at least 1"));
        }

        for (name, value) in [
            ("interp_limit_s", self.interp_limit_s),
            ("gap_warn_s", self.gap_warn_s),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(config_error!("{} must be non-negative, got {}", name, value));
            }
        }

        if !(self.spike_threshold.is_finite() && self.spike_threshold > 0.0) {
            return Err(config_error!("Spike threshold must be positive, got {}", self.spike_threshold));
        }

        if self.smooth_window == 0 || self.smooth_window % 2 == 0 {
            return Err(config_error!("Smoothing window must be a positive odd number, got {}", self.smooth_window));
        }

        if self.smooth_polyorder >= self.smooth_window {
            return Err(config_error!(
                "Smoothing polyorder {} must be less than window {}",
                self.smooth_polyorder,
                self.smooth_window
            ));
        }

        Ok(())
    }
}

/// Global processing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Configuration name/profile
    pub name: String,
    /// Fragment column names
    pub columns: FragmentColumns,
    /// Session preparation parameters
    pub prepare: PrepareParams,
    /// Event detection settings
    pub features: FeatureConfig,
    /// Prepared sessions kept in memory
    pub cache_capacity: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            name: "ctg_default".to_string(),
            columns: FragmentColumns::default(),
            prepare: PrepareParams::default(),
            features: FeatureConfig::default(),
            cache_capacity: 20,
        }
    }
}

impl ProcessingConfig {
    /// Preparation parameters for a requested sample rate
    pub fn prepare_params(&self, sample_rate: Option<f64>) -> PrepareParams {
        match sample_rate {
            Some(rate) => self.prepare.with_sample_rate(rate),
            None => self.prepare.clone(),
        }
    }

    /// Validate entire configuration
    pub fn validate(&self) -> CtgResult<()> {
        if self.columns.time.is_empty() || self.columns.value.is_empty() {
            return Err(config_error!("Fragment column names cannot be empty"));
        }

        if self.cache_capacity == 0 {
            return Err(config_error!("Cache capacity must be greater than 0"));
        }

        self.prepare.validate()?;
        self.features.validate()
    }

    /// Export configuration to JSON
    pub fn to_json(&self) -> CtgResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| CtgError::Serialization {
            reason: format!("Failed to serialize configuration: {}", e),
        })
    }

    /// Import configuration from JSON
    pub fn from_json(json: &str) -> CtgResult<Self> {
        serde_json::from_str(json).map_err(|e| CtgError::Serialization {
            reason: format!("Failed to deserialize configuration: {}", e),
        })
    }

    /// Read and validate a JSON configuration file
    pub fn load(path: &Path) -> CtgResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| CtgError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config = Self::from_json(&json)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProcessingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.prepare.sample_rate, 4.0);
        assert_eq!(config.prepare.median_kernel, 3);
        assert_eq!(config.prepare.ema_span, 20);
        assert_eq!(config.cache_capacity, 20);
        assert_eq!(config.columns.time, "time_sec");
    }

    #[test]
    fn test_config_validation() {
        let mut params = PrepareParams::default();
        assert!(params.validate().is_ok());

        params.sample_rate = 0.0;
        assert!(params.validate().is_err());

        params = PrepareParams::default();
        params.median_kernel = 4;
        assert!(params.validate().is_err());

        params = PrepareParams::default();
        params.smooth_polyorder = 7;
        assert!(params.validate().is_err());

        params = PrepareParams::default();
        params.gap_warn_s = f64::NAN;
        assert!(params.validate().is_err());

        let mut config = ProcessingConfig::default();
        config.cache_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_prepare_params_override() {
        let config = ProcessingConfig::default();
        let params = config.prepare_params(Some(2.0));
        assert_eq!(params.sample_rate, 2.0);
        assert_eq!(params.resample_params().sample_rate, 2.0);
        assert_eq!(params.ema_span, 20);
        assert_eq!(config.prepare_params(None), config.prepare);
    }

    #[test]
    fn test_json_serialization() {
        let config = ProcessingConfig::default();
        let json = config.to_json().unwrap();
        let restored = ProcessingConfig::from_json(&json).unwrap();
        assert_eq!(config, restored);

        // Missing sections fall back to defaults
        let partial = ProcessingConfig::from_json(r#"{"prepare": {"sample_rate": 8.0}}"#).unwrap();
        assert_eq!(partial.prepare.sample_rate, 8.0);
        assert_eq!(partial.prepare.smooth_window, 7);
        assert_eq!(partial.cache_capacity, 20);

        assert!(ProcessingConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctg.json");
        std::fs::write(&path, r#"{"name": "ward", "prepare": {"ema_span": 30}}"#).unwrap();

        let config = ProcessingConfig::load(&path).unwrap();
        assert_eq!(config.name, "ward");
        assert_eq!(config.prepare.ema_span, 30);

        std::fs::write(&path, r#"{"prepare": {"median_kernel": 2}}"#).unwrap();
        assert!(ProcessingConfig::load(&path).is_err());
        assert!(ProcessingConfig::load(&dir.path().join("absent.json")).is_err());
    }
}

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Tunables for the feature, anomaly and experiment stages.
///
/// Compiled defaults can be overridden by a TOML file (`--config`) and then by
/// individual CLI flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub short_window: usize,
    pub long_window: usize,
    pub season_period: usize,
    pub min_decompose_len: usize,
    pub anomaly_window: usize,
    pub min_zscore_periods: usize,
    pub z_threshold: f64,
    pub medium_cut: f64,
    pub high_cut: f64,
    pub min_experiment_samples: usize,
    pub lift: f64,
    pub n_samples: usize,
    pub confidence_level: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            short_window: 7,
            long_window: 30,
            season_period: 7,
            min_decompose_len: 14,
            anomaly_window: 30,
            min_zscore_periods: 7,
            z_threshold: 3.0,
            medium_cut: 4.0,
            high_cut: 5.0,
            min_experiment_samples: 10,
            lift: 0.10,
            n_samples: 1000,
            confidence_level: 0.95,
        }
    }
}

impl EngineConfig {
    pub fn from_toml(raw: &str) -> EngineResult<Self> {
        let config: EngineConfig =
            toml::from_str(raw).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    EngineError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                Self::from_toml(&raw)
            }
            None => Ok(Self::default()),
        }
    }

    /// Significance level implied by the confidence level.
    pub fn alpha(&self) -> f64 {
        1.0 - self.confidence_level
    }

    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |field: &str, message: &str| {
            Err(EngineError::Config(format!("{field}: {message}")))
        };

        for (field, value) in [
            ("short_window", self.short_window),
            ("long_window", self.long_window),
            ("season_period", self.season_period),
            ("anomaly_window", self.anomaly_window),
        ] {
            if value == 0 {
                return invalid(field, "must be at least 1");
            }
        }
        if self.min_zscore_periods < 2 || self.min_zscore_periods > self.anomaly_window {
            return invalid("min_zscore_periods", "must be between 2 and anomaly_window");
        }
        if self.min_decompose_len < 2 * self.season_period {
            return invalid("min_decompose_len", "must cover two seasonal periods");
        }
        let ordered = self.z_threshold > 0.0
            && self.z_threshold < self.medium_cut
            && self.medium_cut < self.high_cut;
        if !ordered {
            return invalid(
                "z_threshold",
                "cut points must satisfy 0 < z_threshold < medium_cut < high_cut",
            );
        }
        if self.min_experiment_samples < 2 || self.n_samples < 2 {
            return invalid("n_samples", "sample sizes must be at least 2");
        }
        if self.confidence_level <= 0.0 || self.confidence_level >= 1.0 || self.confidence_level.is_nan() {
            return invalid("confidence_level", "must be between 0 and 1");
        }
        if !self.lift.is_finite() {
            return invalid("lift", "must be finite");
        }
        Ok(())
    }
}

use chrono::NaiveDate;

use crate::config::EngineConfig;
use crate::models::{AnomalyAnnotation, FeatureRecord, Severity};
use crate::stats;

/// Classification of one day with the scores that drove it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub date: NaiveDate,
    pub growth_z: Option<f64>,
    pub residual_z: Option<f64>,
    pub annotation: AnomalyAnnotation,
}

/// Z-score of each value against the up-to-`window` values before it.
///
/// `None` when fewer than `min_periods` prior values exist or they have no spread.
pub fn trailing_zscores(values: &[f64], window: usize, min_periods: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            let history = &values[i.saturating_sub(window)..i];
            if history.len() < min_periods.max(2) {
                return None;
            }
            let mean = stats::mean(history)?;
            let sd = stats::std_dev(history, 1)?;
            if !sd.is_finite() || sd <= f64::EPSILON * mean.abs().max(1.0) {
                return None;
            }
            let z = (values[i] - mean) / sd;
            z.is_finite().then_some(z)
        })
        .collect()
}

/// Maps the larger absolute z-score to a severity. Cut points are strict, so
/// a score exactly on a boundary lands in the lower tier.
pub fn severity_for(score: f64, config: &EngineConfig) -> Option<Severity> {
    if score.is_nan() || score <= config.z_threshold {
        None
    } else if score > config.high_cut {
        Some(Severity::High)
    } else if score > config.medium_cut {
        Some(Severity::Medium)
    } else {
        Some(Severity::Low)
    }
}

/// Classifies every record. Non-triggering days get an explicit cleared
/// annotation so a rerun overwrites earlier flags.
pub fn classify(records: &[FeatureRecord], config: &EngineConfig) -> Vec<Classification> {
    let growth: Vec<f64> = records.iter().map(|r| r.growth_daily).collect();
    let residual: Vec<f64> = records.iter().map(|r| r.residual).collect();
    let growth_z = trailing_zscores(&growth, config.anomaly_window, config.min_zscore_periods);
    let residual_z = trailing_zscores(&residual, config.anomaly_window, config.min_zscore_periods);

    records
        .iter()
        .zip(growth_z.into_iter().zip(residual_z))
        .map(|(record, (gz, rz))| {
            let score = gz.unwrap_or(0.0).abs().max(rz.unwrap_or(0.0).abs());
            Classification {
                date: record.date,
                growth_z: gz,
                residual_z: rz,
                annotation: AnomalyAnnotation::from_severity(severity_for(score, config)),
            }
        })
        .collect()
}

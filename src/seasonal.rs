//! Additive seasonal decomposition: `value = trend + seasonal + residual`.
//!
//! The trend is a centered moving average over one period, so the first and
//! last `period / 2` points have no trend and therefore no residual. The
//! seasonal component is the per-phase mean of the detrended series, shifted
//! so that one full cycle sums to zero.

use tracing::warn;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq)]
pub struct Decomposition {
    pub trend: Vec<Option<f64>>,
    pub seasonal: Vec<f64>,
}

impl Decomposition {
    /// What is left of `values` after removing trend and seasonal components.
    pub fn residual(&self, values: &[f64]) -> Vec<Option<f64>> {
        values
            .iter()
            .zip(&self.trend)
            .zip(&self.seasonal)
            .map(|((value, t), s)| t.map(|t| value - t - s))
            .collect()
    }
}

/// Centered moving average. Even periods use the half-weighted `2 x period` filter.
fn centered_trend(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let n = values.len();
    let half = period / 2;

    (0..n)
        .map(|i| {
            if i < half || i + half >= n {
                return None;
            }
            let window = &values[i - half..=i + half];
            let total = if period % 2 == 1 {
                window.iter().sum::<f64>()
            } else {
                let inner = window[1..period].iter().sum::<f64>();
                inner + 0.5 * (window[0] + window[period])
            };
            Some(total / period as f64)
        })
        .collect()
}

pub fn decompose(values: &[f64], period: usize) -> EngineResult<Decomposition> {
    if period < 2 {
        return Err(EngineError::ComputationFailure(format!(
            "seasonal period must be at least 2, got {period}"
        )));
    }
    if values.len() < 2 * period {
        return Err(EngineError::InsufficientData {
            needed: 2 * period,
            found: values.len(),
        });
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(EngineError::ComputationFailure(
            "series contains non-finite values".to_string(),
        ));
    }

    let trend = centered_trend(values, period);

    let mut phase_sum = vec![0.0; period];
    let mut phase_count = vec![0usize; period];
    for (i, (value, t)) in values.iter().zip(&trend).enumerate() {
        if let Some(t) = t {
            phase_sum[i % period] += value - t;
            phase_count[i % period] += 1;
        }
    }
    if phase_count.iter().any(|&c| c == 0) {
        return Err(EngineError::ComputationFailure(
            "a seasonal phase has no detrended observations".to_string(),
        ));
    }
    let phase_means: Vec<f64> = phase_sum
        .iter()
        .zip(&phase_count)
        .map(|(sum, &count)| sum / count as f64)
        .collect();
    let offset = phase_means.iter().sum::<f64>() / period as f64;

    let seasonal: Vec<f64> = (0..values.len())
        .map(|i| phase_means[i % period] - offset)
        .collect();

    Ok(Decomposition { trend, seasonal })
}

/// Residual per point, zero where it cannot be computed: series shorter than
/// `min_len`, edge points without a trend, or a failed decomposition.
pub fn residuals(values: &[f64], period: usize, min_len: usize) -> Vec<f64> {
    let zeros = || vec![0.0; values.len()];
    if values.len() < min_len {
        return zeros();
    }
    match decompose(values, period) {
        Ok(decomposition) => decomposition
            .residual(values)
            .into_iter()
            .map(|r| r.filter(|r| r.is_finite()).unwrap_or(0.0))
            .collect(),
        Err(err) => {
            warn!(error = %err, len = values.len(), "seasonal decomposition failed, using zero residuals");
            zeros()
        }
    }
}

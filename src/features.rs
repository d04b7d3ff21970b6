use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::{AnomalyAnnotation, FeatureRecord, RawSeriesPoint};
use crate::seasonal;

/// Per-day trend and growth signals. Growth is `None` where no prior point
/// exists at the lag or the prior count is zero.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingFeatures {
    pub trend_short: Vec<f64>,
    pub trend_long: Vec<f64>,
    pub growth_daily: Vec<Option<f64>>,
    pub growth_weekly: Vec<Option<f64>>,
}

/// Mean over the trailing `window` values ending at each index, using however
/// many values exist near the start of the series.
pub fn trailing_mean(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let slice = &values[start..=i];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

/// Relative change against the value `lag` positions earlier.
pub fn pct_change(values: &[f64], lag: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if lag == 0 || i < lag {
                return None;
            }
            let prior = values[i - lag];
            if prior == 0.0 {
                return None;
            }
            Some((values[i] - prior) / prior)
        })
        .collect()
}

pub fn rolling_features(counts: &[f64], config: &EngineConfig) -> RollingFeatures {
    RollingFeatures {
        trend_short: trailing_mean(counts, config.short_window),
        trend_long: trailing_mean(counts, config.long_window),
        growth_daily: pct_change(counts, 1),
        growth_weekly: pct_change(counts, config.season_period),
    }
}

/// Rejects series that are not strictly ascending by date.
pub fn validate_series(series: &[RawSeriesPoint]) -> EngineResult<()> {
    for pair in series.windows(2) {
        if pair[1].date == pair[0].date {
            return Err(EngineError::InvalidSeries(format!(
                "duplicate date {}",
                pair[1].date
            )));
        }
        if pair[1].date < pair[0].date {
            return Err(EngineError::InvalidSeries(format!(
                "date {} follows {}",
                pair[1].date, pair[0].date
            )));
        }
    }
    if let Some(first) = series.first() {
        if let Some(other) = series.iter().find(|p| p.topic_id != first.topic_id) {
            return Err(EngineError::InvalidSeries(format!(
                "mixed topics {} and {}",
                first.topic_id, other.topic_id
            )));
        }
    }
    Ok(())
}

/// Computes one feature record per observation. Undefined growth is written as 0.
pub fn build_feature_records(
    topic_id: Uuid,
    series: &[RawSeriesPoint],
    config: &EngineConfig,
) -> EngineResult<Vec<FeatureRecord>> {
    validate_series(series)?;
    let counts: Vec<f64> = series.iter().map(|p| p.count as f64).collect();
    let rolling = rolling_features(&counts, config);
    let residuals = seasonal::residuals(&counts, config.season_period, config.min_decompose_len);

    let records = series
        .iter()
        .enumerate()
        .map(|(i, point)| FeatureRecord {
            topic_id,
            date: point.date,
            trend_short: rolling.trend_short[i],
            trend_long: rolling.trend_long[i],
            growth_daily: rolling.growth_daily[i].unwrap_or(0.0),
            growth_weekly: rolling.growth_weekly[i].unwrap_or(0.0),
            residual: residuals[i],
            anomaly: AnomalyAnnotation::clear(),
        })
        .collect();
    Ok(records)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use proptest::prelude::*;

    pub(crate) fn series(topic_id: Uuid, counts: &[u64]) -> Vec<RawSeriesPoint> {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        counts
            .iter()
            .enumerate()
            .map(|(i, &count)| RawSeriesPoint {
                topic_id,
                date: start + Duration::days(i as i64),
                count,
            })
            .collect()
    }

    #[test]
    fn trend_uses_partial_window_at_start() {
        let trend = trailing_mean(&[10.0, 20.0, 30.0, 40.0], 3);
        assert_eq!(trend, vec![10.0, 15.0, 20.0, 30.0]);
    }

    #[test]
    fn growth_is_undefined_without_prior_or_after_zero() {
        let growth = pct_change(&[0.0, 50.0, 100.0, 75.0], 1);
        assert_eq!(growth, vec![None, None, Some(1.0), Some(-0.25)]);
    }

    #[test]
    fn weekly_growth_uses_seven_day_lag() {
        let counts: Vec<f64> = (1..=9).map(|v| v as f64 * 10.0).collect();
        let config = EngineConfig::default();
        let rolling = rolling_features(&counts, &config);
        assert!(rolling.growth_weekly[..7].iter().all(Option::is_none));
        assert_eq!(rolling.growth_weekly[7], Some(7.0));
    }

    #[test]
    fn records_zero_fill_undefined_growth() {
        let topic = Uuid::new_v4();
        let records =
            build_feature_records(topic, &series(topic, &[0, 100, 120]), &EngineConfig::default())
                .unwrap();
        assert_eq!(records[0].growth_daily, 0.0);
        assert_eq!(records[1].growth_daily, 0.0);
        assert!((records[2].growth_daily - 0.2).abs() < 1e-12);
        assert!(records.iter().all(|r| r.residual == 0.0));
    }

    #[test]
    fn duplicate_dates_are_rejected() {
        let topic = Uuid::new_v4();
        let mut points = series(topic, &[1, 2, 3]);
        points[2].date = points[1].date;
        let err = build_feature_records(topic, &points, &EngineConfig::default()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidSeries(_)));
    }

    #[test]
    fn empty_series_yields_no_records() {
        let topic = Uuid::new_v4();
        let records = build_feature_records(topic, &[], &EngineConfig::default()).unwrap();
        assert!(records.is_empty());
    }

    proptest! {
        #[test]
        fn short_series_never_gets_a_residual(counts in prop::collection::vec(0u64..100_000, 0..14)) {
            let topic = Uuid::new_v4();
            let records = build_feature_records(topic, &series(topic, &counts), &EngineConfig::default()).unwrap();
            prop_assert_eq!(records.len(), counts.len());
            prop_assert!(records.iter().all(|r| r.residual == 0.0));
        }

        #[test]
        fn short_trend_stays_within_trailing_range(counts in prop::collection::vec(0u64..1_000_000, 1..90)) {
            let values: Vec<f64> = counts.iter().map(|&c| c as f64).collect();
            let trend = trailing_mean(&values, 7);
            for (i, t) in trend.iter().enumerate() {
                let window = &values[(i + 1).saturating_sub(7)..=i];
                let lo = window.iter().cloned().fold(f64::INFINITY, f64::min);
                let hi = window.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                prop_assert!(*t >= lo && *t <= hi, "trend {} outside [{}, {}]", t, lo, hi);
            }
        }

        #[test]
        fn first_day_and_zero_prior_have_zero_growth(counts in prop::collection::vec(0u64..50, 1..60)) {
            let topic = Uuid::new_v4();
            let records = build_feature_records(topic, &series(topic, &counts), &EngineConfig::default()).unwrap();
            prop_assert_eq!(records[0].growth_daily, 0.0);
            for i in 1..counts.len() {
                if counts[i - 1] == 0 {
                    prop_assert_eq!(records[i].growth_daily, 0.0);
                }
            }
        }
    }
}

use chrono::{NaiveDate, Utc};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use statrs::distribution::{ContinuousCDF, Normal as Gaussian, StudentsT};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::{Conclusion, ExperimentRun, Metric};
use crate::stats;

/// Result of comparing a synthetic control group with a treatment group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestOutcome {
    pub mean_difference: f64,
    pub effect_size: f64,
    pub p_value: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub power: Option<f64>,
}

impl TestOutcome {
    /// Outcome recorded when the test cannot be computed.
    fn neutral(mean_difference: f64) -> Self {
        Self {
            mean_difference,
            effect_size: 0.0,
            p_value: 1.0,
            ci_lower: mean_difference,
            ci_upper: mean_difference,
            power: None,
        }
    }

    pub fn conclusion(&self, alpha: f64) -> Conclusion {
        if self.p_value < alpha {
            Conclusion::Significant
        } else {
            Conclusion::NotSignificant
        }
    }
}

fn numeric(message: impl Into<String>) -> EngineError {
    EngineError::ComputationFailure(message.into())
}

/// Independent two-sample t-test (pooled variance), Cohen's d, a confidence
/// interval for the mean difference and the post-hoc power of the test.
pub fn compare_groups(
    control: &[f64],
    treatment: &[f64],
    confidence_level: f64,
) -> EngineResult<TestOutcome> {
    let (n_c, n_t) = (control.len(), treatment.len());
    if n_c < 2 || n_t < 2 {
        return Err(EngineError::InsufficientData {
            needed: 2,
            found: n_c.min(n_t),
        });
    }
    let mean_c = stats::mean(control).ok_or_else(|| numeric("empty control group"))?;
    let mean_t = stats::mean(treatment).ok_or_else(|| numeric("empty treatment group"))?;
    let diff = mean_t - mean_c;

    let df = (n_c + n_t - 2) as f64;
    let var_c = stats::variance(control, 1).ok_or_else(|| numeric("control variance"))?;
    let var_t = stats::variance(treatment, 1).ok_or_else(|| numeric("treatment variance"))?;
    let pooled_var = ((n_c - 1) as f64 * var_c + (n_t - 1) as f64 * var_t) / df;
    let se = (pooled_var * (1.0 / n_c as f64 + 1.0 / n_t as f64)).sqrt();
    if !se.is_finite() || se <= 0.0 {
        return Err(numeric("zero variance in both groups"));
    }

    let t_dist = StudentsT::new(0.0, 1.0, df).map_err(|e| numeric(e.to_string()))?;
    let t_stat = diff / se;
    let p_value = (2.0 * t_dist.sf(t_stat.abs())).clamp(0.0, 1.0);

    let pop_c = stats::variance(control, 0).ok_or_else(|| numeric("control variance"))?;
    let pop_t = stats::variance(treatment, 0).ok_or_else(|| numeric("treatment variance"))?;
    let pooled_sd = ((pop_c + pop_t) / 2.0).sqrt();
    if pooled_sd <= 0.0 {
        return Err(numeric("pooled standard deviation is zero"));
    }
    let effect_size = diff / pooled_sd;

    let differences: Vec<f64> = treatment
        .iter()
        .zip(control)
        .map(|(t, c)| t - c)
        .collect();
    let sem = stats::sem(&differences).ok_or_else(|| numeric("paired differences"))?;
    let critical = t_dist.inverse_cdf(0.5 + confidence_level / 2.0);
    let half_width = critical * sem;

    let power = power_two_sided(effect_size, n_c, n_t, 1.0 - confidence_level);

    Ok(TestOutcome {
        mean_difference: diff,
        effect_size,
        p_value,
        ci_lower: diff - half_width,
        ci_upper: diff + half_width,
        power,
    })
}

/// Power of a two-sided test at the observed effect, normal approximation.
pub fn power_two_sided(effect_size: f64, n_c: usize, n_t: usize, alpha: f64) -> Option<f64> {
    let gaussian = Gaussian::new(0.0, 1.0).ok()?;
    let z_crit = gaussian.inverse_cdf(1.0 - alpha / 2.0);
    let shift = effect_size.abs() * ((n_c * n_t) as f64 / (n_c + n_t) as f64).sqrt();
    let power = gaussian.cdf(shift - z_crit) + gaussian.cdf(-shift - z_crit);
    power.is_finite().then_some(power.clamp(0.0, 1.0))
}

fn draw<R: Rng + ?Sized>(dist: &Normal<f64>, n: usize, rng: &mut R) -> Vec<f64> {
    (0..n).map(|_| dist.sample(rng)).collect()
}

/// Simulates an A/B test on a topic's historical metric.
///
/// Control is drawn from a normal fit of `history`; treatment uses the same
/// spread with the mean scaled by `1 + config.lift`. Returns
/// `InsufficientData` below `config.min_experiment_samples` observations. A
/// test that cannot be computed numerically still produces a run, with a
/// neutral outcome.
pub fn simulate<R: Rng + ?Sized>(
    topic_id: Uuid,
    metric: Metric,
    history: &[f64],
    config: &EngineConfig,
    run_date: NaiveDate,
    rng: &mut R,
) -> EngineResult<ExperimentRun> {
    let values: Vec<f64> = history.iter().copied().filter(|v| v.is_finite()).collect();
    if values.len() < config.min_experiment_samples {
        return Err(EngineError::InsufficientData {
            needed: config.min_experiment_samples,
            found: values.len(),
        });
    }

    let baseline_mean = stats::mean(&values).ok_or_else(|| numeric("empty history"))?;
    let baseline_sd = stats::std_dev(&values, 1).ok_or_else(|| numeric("history variance"))?;
    let treatment_mean = baseline_mean * (1.0 + config.lift);

    let mut run_test = || -> EngineResult<TestOutcome> {
        let control_dist =
            Normal::new(baseline_mean, baseline_sd).map_err(|e| numeric(e.to_string()))?;
        let treatment_dist =
            Normal::new(treatment_mean, baseline_sd).map_err(|e| numeric(e.to_string()))?;
        let control = draw(&control_dist, config.n_samples, rng);
        let treatment = draw(&treatment_dist, config.n_samples, rng);
        compare_groups(&control, &treatment, config.confidence_level)
    };

    let outcome = match run_test() {
        Ok(outcome) => outcome,
        Err(err) if err.is_degradable() => {
            warn!(%topic_id, metric = %metric, error = %err, "significance test degenerate, recording neutral outcome");
            TestOutcome::neutral(treatment_mean - baseline_mean)
        }
        Err(err) => return Err(err),
    };
    debug!(
        %topic_id,
        mean_difference = outcome.mean_difference,
        p_value = outcome.p_value,
        effect_size = outcome.effect_size,
        "experiment simulated"
    );

    Ok(ExperimentRun {
        run_id: Uuid::new_v4(),
        topic_id,
        metric_name: metric.as_str().to_string(),
        simulated_lift: config.lift,
        effect_size: outcome.effect_size,
        p_value: outcome.p_value,
        ci_lower: outcome.ci_lower,
        ci_upper: outcome.ci_upper,
        power: outcome.power,
        conclusion: outcome.conclusion(config.alpha()),
        run_date,
    })
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn history(n: usize, rng: &mut StdRng) -> Vec<f64> {
        let dist = Normal::new(10.0, 2.0).unwrap();
        draw(&dist, n, rng)
    }

    fn run_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
    }

    #[test]
    fn nine_observations_are_not_enough() {
        let mut rng = StdRng::seed_from_u64(7);
        let values = history(9, &mut rng);
        let err = simulate(
            Uuid::new_v4(),
            Metric::GrowthDaily,
            &values,
            &EngineConfig::default(),
            run_date(),
            &mut rng,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData { needed: 10, found: 9 }));
    }

    #[test]
    fn zero_lift_is_rarely_significant() {
        let mut rng = StdRng::seed_from_u64(42);
        let config = EngineConfig {
            lift: 0.0,
            ..EngineConfig::default()
        };
        let values = history(60, &mut rng);
        let trials = 200;
        let significant = (0..trials)
            .filter(|_| {
                let run = simulate(Uuid::new_v4(), Metric::GrowthDaily, &values, &config, run_date(), &mut rng)
                    .unwrap();
                run.conclusion == Conclusion::Significant
            })
            .count();
        assert!(significant <= trials / 8, "{significant} of {trials} significant");
    }

    #[test]
    fn large_lift_is_detected() {
        let mut rng = StdRng::seed_from_u64(3);
        let values = history(60, &mut rng);
        let run = simulate(
            Uuid::new_v4(),
            Metric::TrendShort,
            &values,
            &EngineConfig::default(),
            run_date(),
            &mut rng,
        )
        .unwrap();
        assert_eq!(run.conclusion, Conclusion::Significant);
        assert!(run.p_value < 1e-6);
        assert!(run.effect_size > 0.0);
        assert!(run.ci_lower < run.ci_upper);
        assert!(run.ci_lower > 0.0);
        assert_eq!(run.metric_name, "trend_short");
        assert!(run.power.unwrap() > 0.99);
    }

    #[test]
    fn seeded_runs_repeat() {
        let values: Vec<f64> = (0..30).map(|i| (i % 7) as f64 * 0.1).collect();
        let config = EngineConfig::default();
        let topic = Uuid::new_v4();
        let a = simulate(topic, Metric::GrowthDaily, &values, &config, run_date(), &mut StdRng::seed_from_u64(9)).unwrap();
        let b = simulate(topic, Metric::GrowthDaily, &values, &config, run_date(), &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(a.p_value, b.p_value);
        assert_eq!(a.effect_size, b.effect_size);
        assert_ne!(a.run_id, b.run_id);
    }

    #[test]
    fn constant_history_degrades_to_neutral_run() {
        let mut rng = StdRng::seed_from_u64(1);
        let run = simulate(
            Uuid::new_v4(),
            Metric::GrowthDaily,
            &[0.0; 20],
            &EngineConfig::default(),
            run_date(),
            &mut rng,
        )
        .unwrap();
        assert_eq!(run.p_value, 1.0);
        assert_eq!(run.effect_size, 0.0);
        assert_eq!(run.conclusion, Conclusion::NotSignificant);
        assert_eq!(run.power, None);
    }

    #[test]
    fn t_test_matches_hand_computation() {
        let control = [1.0, 2.0, 3.0, 4.0, 5.0];
        let treatment = [3.0, 4.0, 5.0, 6.0, 7.0];
        let outcome = compare_groups(&control, &treatment, 0.95).unwrap();
        // pooled variance 2.5, se = 1.0, t = 2.0 on 8 df
        assert!((outcome.p_value - 0.0805).abs() < 1e-3);
        assert!((outcome.effect_size - 2.0 / 2.0f64.sqrt()).abs() < 1e-12);
        // paired differences are constant, so the interval collapses
        assert!((outcome.ci_lower - 2.0).abs() < 1e-12);
        assert!((outcome.ci_upper - 2.0).abs() < 1e-12);
        assert_eq!(outcome.conclusion(0.05), Conclusion::NotSignificant);
    }
}

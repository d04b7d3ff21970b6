//! Small descriptive statistics shared by the feature, anomaly and experiment stages.

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Variance with `ddof` delta degrees of freedom (0 = population, 1 = sample).
pub fn variance(values: &[f64], ddof: usize) -> Option<f64> {
    if values.len() <= ddof {
        return None;
    }
    let mean = mean(values)?;
    let sum_sq = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
    Some(sum_sq / (values.len() - ddof) as f64)
}

pub fn std_dev(values: &[f64], ddof: usize) -> Option<f64> {
    variance(values, ddof).map(f64::sqrt)
}

/// Standard error of the mean (sample standard deviation over sqrt(n)).
pub fn sem(values: &[f64]) -> Option<f64> {
    std_dev(values, 1).map(|sd| sd / (values.len() as f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_has_no_moments() {
        assert_eq!(mean(&[]), None);
        assert_eq!(variance(&[1.0], 1), None);
    }

    #[test]
    fn sample_and_population_variance_differ_by_ddof() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&values), Some(5.0));
        assert_eq!(std_dev(&values, 0), Some(2.0));
        let sample = variance(&values, 1).unwrap();
        assert!((sample - 32.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn sem_scales_with_sample_size() {
        let values = [1.0, 2.0, 3.0, 4.0];
        let expected = std_dev(&values, 1).unwrap() / 2.0;
        assert!((sem(&values).unwrap() - expected).abs() < 1e-12);
    }
}

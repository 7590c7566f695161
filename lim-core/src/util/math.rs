//! Mathematical utility functions.

/// Numerically stable log(1 + exp(x)).
pub fn log1pexp(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

/// Logistic sigmoid 1 / (1 + exp(-x)).
pub fn logistic(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Log-odds log(p / (1 - p)).
pub fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

/// Neumaier-compensated sum.
pub fn compensated_sum<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    let mut sum = 0.0;
    let mut c = 0.0;
    for v in values {
        let t = sum + v;
        if sum.abs() >= v.abs() {
            c += (sum - t) + v;
        } else {
            c += (v - t) + sum;
        }
        sum = t;
    }
    sum + c
}

/// Arithmetic mean (0 for an empty slice).
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance (divides by n).
pub fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn population_std(values: &[f64]) -> f64 {
    population_variance(values).sqrt()
}

/// Standardize to unit population variance, then centre.
pub fn standardize(values: &[f64]) -> Vec<f64> {
    let sd = population_std(values);
    let scaled: Vec<f64> = values.iter().map(|v| v / sd).collect();
    let m = mean(&scaled);
    scaled.iter().map(|v| v - m).collect()
}

/// Dot product of two slices.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Largest absolute value (0 for an empty slice).
pub fn max_abs(values: &[f64]) -> f64 {
    values.iter().fold(0.0_f64, |m, v| m.max(v.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log1pexp() {
        assert!((log1pexp(0.0) - 2.0_f64.ln()).abs() < 1e-15);
        assert!((log1pexp(800.0) - 800.0).abs() < 1e-12);
        assert!(log1pexp(-800.0) >= 0.0);
        assert!((log1pexp(-3.0) - (1.0 + (-3.0_f64).exp()).ln()).abs() < 1e-15);
    }

    #[test]
    fn test_logistic_logit_inverse() {
        for &x in &[-30.0, -2.5, 0.0, 0.7, 12.0] {
            let p = logistic(x);
            assert!((logit(p) - x).abs() < 1e-6 * x.abs().max(1.0));
        }
        assert!(logistic(-1000.0) >= 0.0);
        assert!(logistic(1000.0) <= 1.0);
    }

    #[test]
    fn test_compensated_sum() {
        let values = [1e16, 1.0, -1e16, 1.0];
        assert_eq!(compensated_sum(values), 2.0);
    }

    #[test]
    fn test_population_variance() {
        assert!((population_variance(&[1.0, 2.0, 3.0, 4.0]) - 1.25).abs() < 1e-12);
        assert_eq!(population_variance(&[]), 0.0);
    }

    #[test]
    fn test_standardize() {
        let z = standardize(&[2.0, 4.0, 9.0]);
        assert!(mean(&z).abs() < 1e-12);
        assert!((population_std(&z) - 1.0).abs() < 1e-12);
    }
}

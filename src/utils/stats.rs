use log::warn;
use num::Float;
use statrs::statistics::Statistics;

/// Tricube kernel on the normalized distance `u`.
///
/// Returns `(1 - |u|^3)^3` for `|u| < 1` and `0` otherwise.
pub fn tricube<F: Float>(u: F) -> F {
    let au = u.abs();
    if au >= F::one() {
        return F::zero();
    }
    let one_m = F::one() - au.powi(3);
    one_m.powi(3)
}

/// Weighted mean of `values` under `weights`.
///
/// Returns zero when the inputs are empty, mismatched or the weights sum to
/// zero.
pub fn weighted_mean<F: Float>(
    values: &[F],
    weights: &[F],
) -> F {
    if values.len() != weights.len() {
        warn!(
            "Cannot compute weighted mean: values length ({}) doesn't match \
             weights length ({})",
            values.len(),
            weights.len()
        );
        return F::zero();
    }
    let weight_sum = weights
        .iter()
        .fold(F::zero(), |acc, w| acc + *w);
    if weight_sum <= F::zero() {
        return F::zero();
    }
    values
        .iter()
        .zip(weights.iter())
        .fold(F::zero(), |acc, (v, w)| acc + *v * *w)
        / weight_sum
}

/// Lag-1 autocorrelation of a mean-centered series.
///
/// Returns `None` for series shorter than two observations or with zero
/// variance.
pub fn lag1_autocorr(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = values.iter().mean();
    let denom: f64 = values
        .iter()
        .map(|v| (v - mean).powi(2))
        .sum();
    if denom == 0.0 {
        return None;
    }
    let num: f64 = values
        .windows(2)
        .map(|w| (w[0] - mean) * (w[1] - mean))
        .sum();
    Some(num / denom)
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;

    use super::*;

    #[test]
    fn tricube_support() {
        assert_approx_eq!(tricube(0.0f64), 1.0);
        assert_eq!(tricube(1.0f64), 0.0);
        assert_eq!(tricube(-1.5f64), 0.0);
        assert!(tricube(0.5f64) > 0.0 && tricube(0.5f64) < 1.0);
        assert_approx_eq!(tricube(0.5f64), tricube(-0.5f64));
    }

    #[test]
    fn weighted_mean_basic() {
        let values = [1.0f64, 3.0];
        let weights = [1.0f64, 3.0];
        assert_approx_eq!(weighted_mean(&values, &weights), 2.5);
        assert_eq!(weighted_mean(&values, &[1.0]), 0.0);
    }

    #[test]
    fn lag1_of_alternating_series_is_negative() {
        let series = [1.0, -1.0, 1.0, -1.0, 1.0, -1.0];
        let rho = lag1_autocorr(&series).unwrap();
        assert!(rho < 0.0);
        assert!(lag1_autocorr(&[1.0]).is_none());
        assert!(lag1_autocorr(&[2.0, 2.0, 2.0]).is_none());
    }
}

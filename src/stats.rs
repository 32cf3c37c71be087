//! Statistical utility functions shared across modules
//!
//! Small robust estimators used by size factor, dispersion and outlier code.

use std::cmp::Ordering;

/// Scale factor turning a median absolute deviation into a consistent
/// estimate of the normal standard deviation.
const MAD_CONSTANT: f64 = 1.4826;

fn sort_finite(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    sorted
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

/// Median of the non-NaN values; NaN when there are none
pub fn median(values: &[f64]) -> f64 {
    median_of_sorted(&sort_finite(values))
}

/// Squared median absolute deviation (normal-consistent)
pub fn mad_squared(values: &[f64]) -> f64 {
    let sorted = sort_finite(values);
    if sorted.is_empty() {
        return 0.0;
    }
    let center = median_of_sorted(&sorted);
    let deviations: Vec<f64> = sorted.iter().map(|&x| (x - center).abs()).collect();
    let mad = median(&deviations) * MAD_CONSTANT;
    mad * mad
}

/// Mean after dropping `floor(n * trim_ratio)` values from each end.
///
/// Falls back to the plain mean when trimming would leave nothing.
pub fn trimmed_mean(values: &[f64], trim_ratio: f64) -> f64 {
    let sorted = sort_finite(values);
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    let k = (n as f64 * trim_ratio).floor() as usize;
    let kept = if k * 2 >= n { &sorted[..] } else { &sorted[k..n - k] };
    kept.iter().sum::<f64>() / kept.len() as f64
}

/// Trigamma function (second derivative of ln Gamma)
pub fn trigamma(x: f64) -> f64 {
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).powi(2) - trigamma(1.0 - x);
    }

    // Recurrence up to the asymptotic region
    let mut result = 0.0;
    let mut z = x;
    while z < 8.0 {
        result += 1.0 / (z * z);
        z += 1.0;
    }

    let z2 = z * z;
    result + 1.0 / z + 0.5 / z2 + 1.0 / (6.0 * z2 * z) - 1.0 / (30.0 * z2 * z2 * z)
        + 1.0 / (42.0 * z2 * z2 * z2 * z)
}

/// Sample mean and unbiased variance
pub fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    if n == 0.0 {
        return (f64::NAN, f64::NAN);
    }
    let mean = values.iter().sum::<f64>() / n;
    let var = if n > 1.0 {
        values.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)
    } else {
        0.0
    };
    (mean, var)
}

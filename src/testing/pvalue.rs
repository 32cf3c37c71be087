//! P-value calculation from test statistics

use statrs::distribution::{ContinuousCDF, Normal};

/// Two-sided p-value of a Wald z-statistic, 2 * P(Z > |z|)
pub fn calculate_pvalue(z: f64) -> f64 {
    if !z.is_finite() {
        return f64::NAN;
    }
    2.0 * Normal::standard().cdf(-z.abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pvalue_symmetric() {
        let p1 = calculate_pvalue(2.0);
        let p2 = calculate_pvalue(-2.0);
        assert!((p1 - p2).abs() < 1e-10);
    }

    #[test]
    fn test_pvalue_known_values() {
        assert!((calculate_pvalue(0.0) - 1.0).abs() < 1e-10);
        assert!((calculate_pvalue(1.959964) - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_pvalue_non_finite_is_nan() {
        assert!(calculate_pvalue(f64::NAN).is_nan());
        assert!(calculate_pvalue(f64::INFINITY).is_nan());
    }
}

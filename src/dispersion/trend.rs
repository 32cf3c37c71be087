//! Dispersion trend fitting

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DaaError, Result};
use crate::stats::trimmed_mean;

/// Method for fitting the dispersion-mean trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendFitMethod {
    /// dispersion = a0 + a1 / mean, falling back to `Mean` if the fit fails
    #[default]
    Parametric,
    /// A single trimmed mean of the gene-wise estimates
    Mean,
}

impl fmt::Display for TrendFitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendFitMethod::Parametric => f.write_str("parametric"),
            TrendFitMethod::Mean => f.write_str("mean"),
        }
    }
}

impl FromStr for TrendFitMethod {
    type Err = DaaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "parametric" => Ok(TrendFitMethod::Parametric),
            "mean" => Ok(TrendFitMethod::Mean),
            other => Err(DaaError::InvalidInput {
                reason: format!("unknown trend fit type '{}' (expected parametric or mean)", other),
            }),
        }
    }
}

/// The fitted trend function
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DispersionTrend {
    Parametric { asympt_disp: f64, extra_pois: f64 },
    Mean { value: f64 },
}

impl DispersionTrend {
    /// Trended dispersion at a mean of normalized counts
    pub fn evaluate(&self, mean: f64) -> f64 {
        match *self {
            DispersionTrend::Parametric {
                asympt_disp,
                extra_pois,
            } => {
                if mean > 0.0 {
                    asympt_disp + extra_pois / mean
                } else {
                    f64::NAN
                }
            }
            DispersionTrend::Mean { value } => value,
        }
    }

    pub fn method(&self) -> TrendFitMethod {
        match self {
            DispersionTrend::Parametric { .. } => TrendFitMethod::Parametric,
            DispersionTrend::Mean { .. } => TrendFitMethod::Mean,
        }
    }
}

/// Fit the trend of gene-wise dispersions against base means and evaluate
/// it for every feature. All-zero features (NaN estimates) get NaN.
///
/// Never fails: when no estimate sits clearly above `min_disp` (flat or
/// Poisson-like data) the trend is the floor `Mean { value: min_disp }`.
pub fn fit_dispersion_trend(
    base_means: &[f64],
    gene_dispersions: &[f64],
    method: TrendFitMethod,
    min_disp: f64,
) -> (DispersionTrend, Array1<f64>) {
    let fitted = match method {
        TrendFitMethod::Parametric => fit_parametric_trend(base_means, gene_dispersions, min_disp).or_else(|e| {
            log::warn!("Parametric dispersion trend failed ({}); using the mean dispersion instead", e);
            fit_mean_trend(gene_dispersions, min_disp)
        }),
        TrendFitMethod::Mean => fit_mean_trend(gene_dispersions, min_disp),
    };
    let trend = fitted.unwrap_or_else(|e| {
        log::warn!("{}; flooring the dispersion trend at {:e}", e, min_disp);
        DispersionTrend::Mean { value: min_disp }
    });

    let trended = base_means
        .iter()
        .zip(gene_dispersions)
        .map(|(&m, &g)| if g.is_nan() { f64::NAN } else { trend.evaluate(m) })
        .collect();

    (trend, trended)
}

/// Trimmed mean (0.1%) of estimates above 10 * min_disp
fn fit_mean_trend(gene_dispersions: &[f64], min_disp: f64) -> Result<DispersionTrend> {
    let usable: Vec<f64> = gene_dispersions
        .iter()
        .copied()
        .filter(|&d| d.is_finite() && d > 10.0 * min_disp)
        .collect();

    if usable.is_empty() {
        return Err(DaaError::TrendFittingFailed {
            reason: "all gene-wise dispersion estimates are within 2 orders of magnitude of the minimum value".to_string(),
        });
    }

    Ok(DispersionTrend::Mean {
        value: trimmed_mean(&usable, 0.001),
    })
}

/// Iterated Gamma GLM (identity link) of dispersion on 1/mean, dropping
/// points whose residual ratio falls outside (1e-4, 15) at each round.
fn fit_parametric_trend(means: &[f64], dispersions: &[f64], min_disp: f64) -> Result<DispersionTrend> {
    let data: Vec<(f64, f64)> = means
        .iter()
        .zip(dispersions)
        .filter(|(&m, &d)| m > 0.0 && d.is_finite() && d >= 100.0 * min_disp)
        .map(|(&m, &d)| (m, d))
        .collect();

    if data.len() < 3 {
        return Err(DaaError::TrendFittingFailed {
            reason: "not enough features with usable dispersion estimates".to_string(),
        });
    }

    let mut coefs = (0.1_f64, 1.0_f64);
    for iter in 0..11 {
        let old = coefs;
        let good: Vec<(f64, f64)> = data
            .iter()
            .copied()
            .filter(|&(mean, disp)| {
                let fitted = coefs.0 + coefs.1 / mean;
                let residual = disp / fitted;
                fitted > 0.0 && residual > 1e-4 && residual < 15.0
            })
            .collect();

        if good.len() < 3 {
            return Err(DaaError::TrendFittingFailed {
                reason: "not enough points with acceptable residuals".to_string(),
            });
        }

        let (new_coefs, glm_converged) = fit_gamma_identity(&good, coefs);
        coefs = new_coefs;

        if coefs.0 <= 0.0 || coefs.1 <= 0.0 {
            return Err(DaaError::TrendFittingFailed {
                reason: format!("coefficients not positive (a0={:.4}, a1={:.4})", coefs.0, coefs.1),
            });
        }

        let log_change = (coefs.0 / old.0).ln().powi(2) + (coefs.1 / old.1).ln().powi(2);
        if log_change < 1e-6 && glm_converged {
            log::debug!(
                "Parametric trend converged after {} rounds: a0={:.6}, a1={:.4}",
                iter + 1,
                coefs.0,
                coefs.1
            );
            return Ok(DispersionTrend::Parametric {
                asympt_disp: coefs.0,
                extra_pois: coefs.1,
            });
        }
    }

    Err(DaaError::TrendFittingFailed {
        reason: "dispersion fit did not converge".to_string(),
    })
}

fn gamma_deviance(data: &[(f64, f64)], a0: f64, a1: f64) -> f64 {
    data.iter()
        .map(|&(mean, disp)| {
            let mu = (a0 + a1 / mean).max(1e-8);
            2.0 * (-(disp / mu).ln() + (disp - mu) / mu)
        })
        .sum()
}

/// Gamma GLM y ~ 1 + 1/x with identity link, by IRLS from `start`
fn fit_gamma_identity(data: &[(f64, f64)], start: (f64, f64)) -> ((f64, f64), bool) {
    let (mut a0, mut a1) = start;
    let mut dev_old = gamma_deviance(data, a0, a1);

    for _ in 0..25 {
        let (mut sw, mut swx, mut swz, mut swxx, mut swxz) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for &(mean, disp) in data {
            let x = 1.0 / mean;
            let mu = (a0 + a1 * x).max(1e-8);
            let w = 1.0 / (mu * mu);
            sw += w;
            swx += w * x;
            swz += w * disp;
            swxx += w * x * x;
            swxz += w * x * disp;
        }

        let det = sw * swxx - swx * swx;
        if det.abs() < 1e-10 {
            break;
        }
        a0 = (swxx * swz - swx * swxz) / det;
        a1 = (sw * swxz - swx * swz) / det;

        let dev = gamma_deviance(data, a0, a1);
        if (dev_old - dev).abs() / (0.1 + dev.abs()) < 1e-8 {
            return ((a0, a1), true);
        }
        dev_old = dev;
    }

    ((a0, a1), false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parametric_recovers_coefficients() {
        let means: Vec<f64> = (1..=60).map(|i| 2.0 * i as f64).collect();
        // Deterministic multiplicative scatter around 0.05 + 2/mean
        let disps: Vec<f64> = means
            .iter()
            .enumerate()
            .map(|(i, &m)| (0.05 + 2.0 / m) * if i % 2 == 0 { 1.1 } else { 0.9 })
            .collect();

        let (trend, trended) = fit_dispersion_trend(&means, &disps, TrendFitMethod::Parametric, 1e-8);
        match trend {
            DispersionTrend::Parametric {
                asympt_disp,
                extra_pois,
            } => {
                assert!((asympt_disp - 0.05).abs() < 0.01);
                assert!((extra_pois - 2.0).abs() < 0.3);
            }
            other => panic!("expected parametric trend, got {:?}", other),
        }
        assert!(trended[0] > trended[59]);
    }

    #[test]
    fn test_parametric_falls_back_to_mean() {
        // Dispersion increasing with mean gives a negative a1
        let means = vec![1.0, 10.0, 100.0, 1000.0];
        let disps = vec![0.01, 0.02, 0.2, 2.0];
        let (trend, trended) = fit_dispersion_trend(&means, &disps, TrendFitMethod::Parametric, 1e-8);
        assert_eq!(trend.method(), TrendFitMethod::Mean);
        assert!(trended.iter().all(|&t| (t - trended[0]).abs() < 1e-12));
    }

    #[test]
    fn test_mean_trend_skips_nan_features() {
        let means = vec![10.0, 0.0, 30.0];
        let disps = vec![0.2, f64::NAN, 0.4];
        let (trend, trended) = fit_dispersion_trend(&means, &disps, TrendFitMethod::Mean, 1e-8);
        assert_eq!(trend.method(), TrendFitMethod::Mean);
        assert!((trend.evaluate(5.0) - 0.3).abs() < 1e-12);
        assert!(trended[1].is_nan());
        assert!((trended[2] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_near_minimum_estimates_floor_the_trend() {
        let means = vec![50.0, 0.0, 80.0, 120.0];
        let disps = vec![1e-8, f64::NAN, 1e-8, 5e-8];
        for method in [TrendFitMethod::Parametric, TrendFitMethod::Mean] {
            let (trend, trended) = fit_dispersion_trend(&means, &disps, method, 1e-8);
            assert_eq!(trend, DispersionTrend::Mean { value: 1e-8 });
            assert_eq!(trended[0], 1e-8);
            assert!(trended[1].is_nan());
            assert_eq!(trended[3], 1e-8);
        }
    }

    #[test]
    fn test_fit_type_parse() {
        assert_eq!("Mean".parse::<TrendFitMethod>().unwrap(), TrendFitMethod::Mean);
        assert!("local".parse::<TrendFitMethod>().is_err());
    }
}

//! Size factor estimation using the median of ratios method

use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DaaError, Result};
use crate::stats::median;

/// Method for size factor estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeFactorMethod {
    /// Median of ratios over features positive in every sample
    #[default]
    Ratio,
    /// Geometric means over positive counts only, for sparse tables
    PosCounts,
}

impl fmt::Display for SizeFactorMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeFactorMethod::Ratio => f.write_str("ratio"),
            SizeFactorMethod::PosCounts => f.write_str("poscounts"),
        }
    }
}

impl FromStr for SizeFactorMethod {
    type Err = DaaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ratio" => Ok(SizeFactorMethod::Ratio),
            "poscounts" => Ok(SizeFactorMethod::PosCounts),
            other => Err(DaaError::InvalidInput {
                reason: format!("unknown size factor type '{}' (expected ratio or poscounts)", other),
            }),
        }
    }
}

/// Estimate per-sample size factors.
///
/// With [`SizeFactorMethod::Ratio`], a table where no feature is positive in
/// every sample falls back to [`SizeFactorMethod::PosCounts`]. That is the
/// usual situation for amplicon tables.
pub fn estimate_size_factors(counts: ArrayView2<f64>, method: SizeFactorMethod) -> Result<Array1<f64>> {
    let (n_features, n_samples) = counts.dim();
    if n_features == 0 || n_samples == 0 {
        return Err(DaaError::EmptyData {
            reason: "Count matrix is empty".to_string(),
        });
    }

    let size_factors = match method {
        SizeFactorMethod::Ratio => match size_factors_ratio(counts) {
            Ok(sf) => sf,
            Err(DaaError::SizeFactorFailed { reason }) => {
                log::warn!(
                    "Median-of-ratios size factors failed ({}); falling back to poscounts",
                    reason
                );
                size_factors_poscounts(counts)?
            }
            Err(e) => return Err(e),
        },
        SizeFactorMethod::PosCounts => size_factors_poscounts(counts)?,
    };

    log::debug!("Size factors: {:?}", size_factors.to_vec());
    Ok(size_factors)
}

/// Standard median of ratios method
fn size_factors_ratio(counts: ArrayView2<f64>) -> Result<Array1<f64>> {
    let n_samples = counts.ncols();

    // Log geometric mean of every feature that is positive everywhere
    let log_geo_means: Vec<(usize, f64)> = counts
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().all(|&x| x > 0.0))
        .map(|(i, row)| (i, row.iter().map(|&x| x.ln()).sum::<f64>() / n_samples as f64))
        .collect();

    if log_geo_means.is_empty() {
        return Err(DaaError::SizeFactorFailed {
            reason: "every feature has a zero in at least one sample".to_string(),
        });
    }

    let mut size_factors = Array1::zeros(n_samples);
    for j in 0..n_samples {
        let log_ratios: Vec<f64> = log_geo_means
            .iter()
            .map(|&(i, lgm)| counts[[i, j]].ln() - lgm)
            .collect();
        size_factors[j] = median(&log_ratios).exp();
    }

    if size_factors.iter().any(|&x| x <= 0.0 || !x.is_finite()) {
        return Err(DaaError::SizeFactorFailed {
            reason: "Invalid size factors computed".to_string(),
        });
    }

    Ok(size_factors)
}

/// Geometric mean over positive counts (divided by the total sample count),
/// then re-centred so the size factors have geometric mean 1.
fn size_factors_poscounts(counts: ArrayView2<f64>) -> Result<Array1<f64>> {
    let n_samples = counts.ncols();

    let log_geo_means: Vec<(usize, f64)> = counts
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().any(|&x| x > 0.0))
        .map(|(i, row)| {
            let log_sum: f64 = row.iter().filter(|&&x| x > 0.0).map(|&x| x.ln()).sum();
            (i, log_sum / n_samples as f64)
        })
        .collect();

    if log_geo_means.is_empty() {
        return Err(DaaError::SizeFactorFailed {
            reason: "No features with positive counts found".to_string(),
        });
    }

    let mut size_factors = Array1::zeros(n_samples);
    for j in 0..n_samples {
        let log_ratios: Vec<f64> = log_geo_means
            .iter()
            .filter(|&&(i, _)| counts[[i, j]] > 0.0)
            .map(|&(i, lgm)| counts[[i, j]].ln() - lgm)
            .collect();

        // A sample with no positive feature keeps a neutral factor
        size_factors[j] = if log_ratios.is_empty() {
            1.0
        } else {
            median(&log_ratios).exp()
        };
    }

    let log_center = size_factors.iter().map(|&x| x.ln()).sum::<f64>() / n_samples as f64;
    let center = log_center.exp();
    size_factors.mapv_inplace(|x| x / center);

    Ok(size_factors)
}

/// Counts divided by their sample's size factor
pub fn normalized_counts(counts: ArrayView2<f64>, size_factors: &Array1<f64>) -> Array2<f64> {
    let mut normalized = counts.to_owned();
    for (mut col, &sf) in normalized.axis_iter_mut(Axis(1)).zip(size_factors.iter()) {
        if sf > 0.0 {
            col.mapv_inplace(|x| x / sf);
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_size_factor_estimation() {
        let counts = array![
            [100.0, 200.0, 80.0, 160.0],
            [500.0, 1000.0, 400.0, 800.0],
            [50.0, 100.0, 40.0, 80.0],
            [200.0, 400.0, 160.0, 320.0]
        ];
        let sf = estimate_size_factors(counts.view(), SizeFactorMethod::Ratio).unwrap();
        assert_eq!(sf.len(), 4);
        assert!(sf.iter().all(|&x| x > 0.0));

        // s2 has 2x the depth of s1
        let ratio = sf[1] / sf[0];
        assert!((ratio - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalized_counts_flatten_depth() {
        let counts = array![[100.0, 200.0, 80.0, 160.0], [500.0, 1000.0, 400.0, 800.0]];
        let sf = estimate_size_factors(counts.view(), SizeFactorMethod::Ratio).unwrap();
        let norm = normalized_counts(counts.view(), &sf);

        let row: Vec<f64> = norm.row(0).to_vec();
        let mean = row.iter().sum::<f64>() / 4.0;
        for val in row {
            assert!((val - mean).abs() / mean < 1e-9);
        }
    }

    #[test]
    fn test_sparse_table_falls_back_to_poscounts() {
        // no feature is positive in every sample
        let counts = array![
            [0.0, 10.0, 20.0, 40.0],
            [10.0, 0.0, 20.0, 40.0],
            [10.0, 20.0, 0.0, 40.0],
            [10.0, 20.0, 40.0, 0.0]
        ];
        let ratio = estimate_size_factors(counts.view(), SizeFactorMethod::Ratio).unwrap();
        let pos = estimate_size_factors(counts.view(), SizeFactorMethod::PosCounts).unwrap();
        assert_eq!(ratio, pos);
        assert!(pos.iter().all(|&x| x > 0.0 && x.is_finite()));

        let log_mean = pos.iter().map(|&x| x.ln()).sum::<f64>() / 4.0;
        assert!(log_mean.abs() < 1e-12);
        assert!(pos[3] > pos[0]);
    }
}

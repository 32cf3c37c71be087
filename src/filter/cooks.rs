//! Cook's distance outlier detection
//!
//! cooks = PearsonResSq / p * h / (1 - h)^2, with the Pearson residual taken
//! under a robust method-of-moments dispersion rather than the fitted one.

use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

use crate::stats::trimmed_mean;

/// Floor on the method-of-moments dispersion
const MIN_MOMENTS_DISP: f64 = 0.04;

/// Replicates a level needs before its samples can be flagged
pub const MIN_REPLICATES_FOR_COOKS: usize = 3;

/// (trim ratio, scale) for a cell of `n` samples
fn trim_and_scale(n: usize) -> (f64, f64) {
    if n <= 3 {
        (1.0 / 3.0, 2.04)
    } else if n <= 23 {
        (1.0 / 4.0, 1.86)
    } else {
        (1.0 / 8.0, 1.51)
    }
}

fn trimmed_variance(values: &[f64], trim_ratio: f64, scale: f64) -> f64 {
    let center = trimmed_mean(values, trim_ratio);
    let sq_errors: Vec<f64> = values.iter().map(|&v| (v - center).powi(2)).collect();
    scale * trimmed_mean(&sq_errors, trim_ratio)
}

/// Robust dispersion (v - m) / m^2 from the trimmed within-level variance.
///
/// The variance is the largest trimmed variance over levels with at least
/// three samples, or the trimmed variance across all samples when no level
/// has that many.
pub fn robust_method_of_moments_disp(normalized: ArrayView2<f64>, sample_levels: &[usize]) -> Vec<f64> {
    let n_levels = sample_levels.iter().copied().max().map_or(0, |m| m + 1);
    let mut cells: Vec<Vec<usize>> = vec![Vec::new(); n_levels];
    for (j, &level) in sample_levels.iter().enumerate() {
        cells[level].push(j);
    }
    let big_cells: Vec<&Vec<usize>> = cells.iter().filter(|c| c.len() >= MIN_REPLICATES_FOR_COOKS).collect();

    normalized
        .rows()
        .into_iter()
        .map(|row| {
            let values = row.to_vec();
            let variance = if big_cells.is_empty() {
                trimmed_variance(&values, 1.0 / 8.0, 1.51)
            } else {
                big_cells
                    .iter()
                    .map(|cell| {
                        let cell_values: Vec<f64> = cell.iter().map(|&j| values[j]).collect();
                        let (trim, scale) = trim_and_scale(cell_values.len());
                        trimmed_variance(&cell_values, trim, scale)
                    })
                    .fold(0.0, f64::max)
            };

            let mean = values.iter().sum::<f64>() / values.len() as f64;
            if mean > 0.0 {
                ((variance - mean) / (mean * mean)).max(MIN_MOMENTS_DISP)
            } else {
                MIN_MOMENTS_DISP
            }
        })
        .collect()
}

/// Cook's distances, features x samples. Unfitted features are NaN.
pub fn calculate_cooks_distance(
    counts: ArrayView2<f64>,
    mu: &Array2<f64>,
    hat_diagonals: &Array2<f64>,
    dispersions: &[f64],
    n_coefs: usize,
) -> Array2<f64> {
    let (n_features, n_samples) = counts.dim();
    let p = n_coefs as f64;

    let rows: Vec<Vec<f64>> = (0..n_features)
        .into_par_iter()
        .map(|i| {
            let alpha = dispersions[i];
            (0..n_samples)
                .map(|j| {
                    let y = counts[[i, j]];
                    let m = mu[[i, j]];
                    let h = hat_diagonals[[i, j]];
                    let v = m + alpha * m * m;
                    let pearson_sq = if v > 0.0 { (y - m).powi(2) / v } else { f64::NAN };
                    if h.is_finite() && h < 1.0 && pearson_sq.is_finite() {
                        pearson_sq / p * h / (1.0 - h).powi(2)
                    } else {
                        f64::NAN
                    }
                })
                .collect()
        })
        .collect();

    let mut cooks = Array2::from_elem((n_features, n_samples), f64::NAN);
    for (i, row) in rows.into_iter().enumerate() {
        for (j, c) in row.into_iter().enumerate() {
            cooks[[i, j]] = c;
        }
    }
    cooks
}

/// The 0.99 quantile of F(p, m - p)
pub fn default_cooks_cutoff(n_samples: usize, n_coefs: usize) -> f64 {
    if n_samples <= n_coefs {
        return f64::INFINITY;
    }
    let df1 = n_coefs as f64;
    let df2 = (n_samples - n_coefs) as f64;
    match FisherSnedecor::new(df1, df2) {
        Ok(f_dist) => f_dist.inverse_cdf(0.99),
        Err(_) => f64::INFINITY,
    }
}

/// Largest Cook's distance per feature, over the samples in `eligible`.
/// Returns the value and the sample it came from.
pub fn max_cooks_per_feature(cooks: &Array2<f64>, eligible: &[bool]) -> Vec<Option<(f64, usize)>> {
    cooks
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .filter(|&(j, c)| eligible[j] && c.is_finite())
                .map(|(j, &c)| (c, j))
                .max_by(|a, b| a.0.total_cmp(&b.0))
        })
        .collect()
}

/// Features with an influential sample above `cutoff`.
///
/// Only samples from levels with at least three replicates are eligible. For
/// two-level designs a flag is dropped when three or more samples have a
/// larger count than the outlying one.
pub fn flag_cooks_outliers(
    counts: ArrayView2<f64>,
    cooks: &Array2<f64>,
    sample_levels: &[usize],
    level_sizes: &[usize],
    cutoff: f64,
) -> Vec<bool> {
    let eligible: Vec<bool> = sample_levels
        .iter()
        .map(|&l| level_sizes[l] >= MIN_REPLICATES_FOR_COOKS)
        .collect();
    let two_level = level_sizes.len() == 2;

    max_cooks_per_feature(cooks, &eligible)
        .into_iter()
        .enumerate()
        .map(|(i, max)| match max {
            Some((value, sample)) if value > cutoff => {
                if two_level {
                    let outlier_count = counts[[i, sample]];
                    let n_greater = counts.row(i).iter().filter(|&&c| c > outlier_count).count();
                    n_greater < 3
                } else {
                    true
                }
            }
            _ => false,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_default_cutoff_is_finite() {
        let cutoff = default_cooks_cutoff(8, 2);
        assert!(cutoff.is_finite() && cutoff > 1.0);
        assert!(default_cooks_cutoff(2, 2).is_infinite());
    }

    #[test]
    fn test_robust_disp_floor() {
        let normalized = array![[10.0, 10.0, 10.0, 10.0, 10.0, 10.0], [0.0, 0.0, 0.0, 0.0, 0.0, 0.0]];
        let disp = robust_method_of_moments_disp(normalized.view(), &[0, 0, 0, 1, 1, 1]);
        assert_eq!(disp, vec![MIN_MOMENTS_DISP, MIN_MOMENTS_DISP]);
    }

    #[test]
    fn test_spike_is_flagged() {
        let counts = array![
            [10.0, 11.0, 9.0, 500.0, 10.0, 12.0, 11.0, 10.0],
            [10.0, 11.0, 9.0, 10.0, 10.0, 12.0, 11.0, 10.0]
        ];
        let levels = [0, 0, 0, 0, 1, 1, 1, 1];
        let sizes = [4, 4];
        let mu = array![
            [132.5, 132.5, 132.5, 132.5, 10.75, 10.75, 10.75, 10.75],
            [10.0, 10.0, 10.0, 10.0, 10.75, 10.75, 10.75, 10.75]
        ];
        let hat = Array2::from_elem((2, 8), 0.25);
        let disp = robust_method_of_moments_disp(counts.view(), &levels);
        let cooks = calculate_cooks_distance(counts.view(), &mu, &hat, &disp, 2);

        let cutoff = default_cooks_cutoff(8, 2);
        let flags = flag_cooks_outliers(counts.view(), &cooks, &levels, &sizes, cutoff);
        assert_eq!(flags, vec![true, false]);

        let maxima = max_cooks_per_feature(&cooks, &[true; 8]);
        let (spike, sample) = maxima[0].unwrap();
        assert_eq!(sample, 3);
        assert!(spike > maxima[1].unwrap().0);
    }

    #[test]
    fn test_small_levels_never_flag() {
        let counts = array![[5.0, 900.0, 4.0, 3.0]];
        let cooks = array![[0.1, 50.0, 0.1, 0.1]];
        let flags = flag_cooks_outliers(counts.view(), &cooks, &[0, 0, 1, 1], &[2, 2], 1.0);
        assert_eq!(flags, vec![false]);
    }
}

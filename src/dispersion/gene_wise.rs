//! Gene-wise dispersion estimation using the Cox-Reid adjusted profile likelihood

use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;

use super::posterior::PosteriorInput;
use super::DispersionParams;
use crate::glm::linalg::{solve_symmetric_system, weighted_cross_product};
use crate::glm::{fit_single_feature, GlmFitParams, MIN_MU};
use crate::stats::mean_and_variance;

/// True when the number of distinct design rows equals the number of
/// columns, i.e. the fitted means are just group means.
pub(crate) fn is_linear_mu(design: &Array2<f64>) -> bool {
    let p = design.ncols();
    let mut unique_rows: Vec<Vec<i64>> = Vec::new();
    for row in design.rows() {
        let key: Vec<i64> = row.iter().map(|&x| (x * 1000.0).round() as i64).collect();
        if !unique_rows.contains(&key) {
            unique_rows.push(key);
        }
    }
    unique_rows.len() == p
}

/// OLS fitted values X (X'X)^-1 X' y
fn linear_model_fit(y: &[f64], design: &Array2<f64>) -> Vec<f64> {
    let n = y.len();
    let p = design.ncols();
    let xtx = weighted_cross_product(design, &vec![1.0; n]);
    let mut xty = vec![0.0; p];
    for i in 0..n {
        for j in 0..p {
            xty[j] += design[[i, j]] * y[i];
        }
    }
    let beta = solve_symmetric_system(&xtx, &xty, p);
    (0..n)
        .map(|i| (0..p).map(|j| design[[i, j]] * beta[j]).sum())
        .collect()
}

/// sum(((y - mu)^2 - mu) / mu^2) / (m - p) on normalized counts
fn rough_disp_estimate(normalized: &[f64], design: &Array2<f64>) -> f64 {
    let m = normalized.len();
    let p = design.ncols();
    let mu = linear_model_fit(normalized, design);

    let sum_term: f64 = normalized
        .iter()
        .zip(&mu)
        .map(|(&y, &mu_i)| {
            let mu_i = mu_i.max(1.0);
            ((y - mu_i).powi(2) - mu_i) / (mu_i * mu_i)
        })
        .sum();

    (sum_term / (m - p) as f64).max(0.0)
}

/// (var - xim * mean) / mean^2, where xim is the mean of 1 / size factor
fn moments_disp_estimate(normalized: &[f64], xim: f64) -> f64 {
    let (base_mean, base_var) = mean_and_variance(normalized);
    if base_mean > 1e-10 {
        (base_var - xim * base_mean) / (base_mean * base_mean)
    } else {
        f64::INFINITY
    }
}

/// Dispersion upper bound: max(10, number of samples)
pub(crate) fn max_dispersion(n_samples: usize) -> f64 {
    (n_samples as f64).max(10.0)
}

/// Gene-wise estimate for one feature. Returns the dispersion and the
/// fitted means used to compute it. All-zero features give NaN.
pub fn estimate_dispersion_feature(
    counts: &[f64],
    size_factors: &[f64],
    design: &Array2<f64>,
    xim: f64,
    use_linear_mu: bool,
    params: &DispersionParams,
) -> (f64, Vec<f64>) {
    let n_samples = counts.len();
    if counts.iter().all(|&c| c == 0.0) {
        return (f64::NAN, vec![f64::NAN; n_samples]);
    }

    let min_disp = params.min_disp;
    let max_disp = max_dispersion(n_samples);

    let normalized: Vec<f64> = counts
        .iter()
        .zip(size_factors)
        .map(|(&c, &s)| if s > 0.0 { c / s } else { 0.0 })
        .collect();

    let rough = rough_disp_estimate(&normalized, design);
    let moments = moments_disp_estimate(&normalized, xim);
    let alpha_init = rough.min(moments).max(min_disp).min(max_disp);

    let mu: Vec<f64> = if use_linear_mu {
        linear_model_fit(&normalized, design)
            .iter()
            .zip(size_factors)
            .map(|(&m, &s)| (m * s).max(MIN_MU))
            .collect()
    } else {
        let y = Array1::from_vec(counts.to_vec());
        let sf = Array1::from_vec(size_factors.to_vec());
        fit_single_feature(y.view(), design, sf.view(), alpha_init, &GlmFitParams::default()).mu
    };

    let posterior = PosteriorInput {
        counts,
        design,
        mu: &mu,
        prior: None,
    };
    let start = alpha_init.ln().clamp(-30.0, max_disp.ln());
    let outcome = posterior.line_search(start, min_disp, params.kappa_0, params.maxit, params.disp_tol);

    // Keep the starting value when the optimizer did not improve on it
    let no_increase = outcome.last_lp < outcome.initial_lp + outcome.initial_lp.abs() / 1e6;
    let mut result = if no_increase {
        alpha_init
    } else {
        outcome.log_alpha.exp().max(min_disp)
    };

    let converged = outcome.iterations < params.maxit && outcome.iterations != 1;
    if !converged && result > min_disp * 10.0 {
        result = posterior.grid_search(min_disp, max_disp);
    }

    (result.clamp(min_disp, max_disp), mu)
}

/// Gene-wise dispersions for every feature, in parallel.
/// Returns the estimates and the features x samples matrix of fitted means.
pub fn estimate_gene_dispersions(
    counts: ArrayView2<f64>,
    size_factors: &Array1<f64>,
    design: &Array2<f64>,
    params: &DispersionParams,
) -> (Array1<f64>, Array2<f64>) {
    let n_features = counts.nrows();
    let n_samples = counts.ncols();
    let sf: Vec<f64> = size_factors.to_vec();
    let xim = sf.iter().map(|&s| 1.0 / s.max(1e-10)).sum::<f64>() / n_samples as f64;
    let use_linear_mu = is_linear_mu(design);

    let fits: Vec<(f64, Vec<f64>)> = (0..n_features)
        .into_par_iter()
        .map(|i| {
            let row = counts.row(i).to_vec();
            estimate_dispersion_feature(&row, &sf, design, xim, use_linear_mu, params)
        })
        .collect();

    let mut dispersions = Array1::zeros(n_features);
    let mut mu = Array2::zeros((n_features, n_samples));
    for (i, (disp, feature_mu)) in fits.into_iter().enumerate() {
        dispersions[i] = disp;
        for (j, m) in feature_mu.into_iter().enumerate() {
            mu[[i, j]] = m;
        }
    }

    log::debug!(
        "Gene-wise dispersions estimated for {} features ({} all-zero)",
        n_features,
        dispersions.iter().filter(|d| d.is_nan()).count()
    );

    (dispersions, mu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn design() -> Array2<f64> {
        array![[1.0, 0.0], [1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0], [1.0, 1.0]]
    }

    #[test]
    fn test_group_design_is_linear() {
        assert!(is_linear_mu(&design()));
        let continuous = array![[1.0, 0.1], [1.0, 0.2], [1.0, 0.3]];
        assert!(!is_linear_mu(&continuous));
    }

    #[test]
    fn test_overdispersed_feature_gets_larger_estimate() {
        let sf = vec![1.0; 6];
        let params = DispersionParams::default();
        let quiet = [50.0, 52.0, 49.0, 51.0, 50.0, 48.0];
        let noisy = [10.0, 90.0, 40.0, 5.0, 120.0, 60.0];

        let (quiet_disp, _) = estimate_dispersion_feature(&quiet, &sf, &design(), 1.0, true, &params);
        let (noisy_disp, mu) = estimate_dispersion_feature(&noisy, &sf, &design(), 1.0, true, &params);

        assert!(quiet_disp < noisy_disp);
        assert!(noisy_disp > 0.1);
        assert!((mu[0] - 140.0 / 3.0).abs() < 1e-6);
        assert!(quiet_disp >= params.min_disp && noisy_disp <= 10.0);
    }

    #[test]
    fn test_all_zero_feature_is_nan() {
        let counts = array![[0.0, 0.0, 0.0, 0.0, 0.0, 0.0], [5.0, 8.0, 6.0, 9.0, 7.0, 4.0]];
        let sf = Array1::ones(6);
        let (disp, mu) = estimate_gene_dispersions(counts.view(), &sf, &design(), &DispersionParams::default());
        assert!(disp[0].is_nan());
        assert!(mu.row(0).iter().all(|m| m.is_nan()));
        assert!(disp[1].is_finite());
    }
}

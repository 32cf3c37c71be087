//! GLM fitting using Iteratively Reweighted Least Squares (IRLS)

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::linalg::{
    invert_symmetric_matrix, mat_mul, ridge_lambda, solve_symmetric_system, weighted_cross_product,
};
use super::negative_binomial::{nb_deviance, nb_log_likelihood, nb_mean, nb_weight, MAX_LFC_BETA, MIN_MU};

/// Configurable parameters for GLM fitting
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlmFitParams {
    /// Maximum IRLS iterations
    pub maxit: usize,
    /// Relative deviance change that counts as converged
    pub beta_tol: f64,
}

impl Default for GlmFitParams {
    fn default() -> Self {
        Self {
            maxit: 100,
            beta_tol: 1e-8,
        }
    }
}

/// Fit for one feature. Coefficients are on the natural log scale.
#[derive(Debug, Clone, PartialEq)]
pub struct GlmFitResult {
    pub coefficients: Vec<f64>,
    pub standard_errors: Vec<f64>,
    /// Row-major covariance: element (i, j) = `covariance[i * n_coefs + j]`
    pub covariance: Vec<f64>,
    pub n_coefs: usize,
    pub converged: bool,
    pub hat_diagonals: Vec<f64>,
    pub mu: Vec<f64>,
    pub log_likelihood: f64,
}

impl GlmFitResult {
    /// Placeholder for features that cannot be fitted (all zero, no dispersion)
    pub fn unfitted(n_coefs: usize, n_samples: usize) -> Self {
        Self {
            coefficients: vec![f64::NAN; n_coefs],
            standard_errors: vec![f64::NAN; n_coefs],
            covariance: vec![f64::NAN; n_coefs * n_coefs],
            n_coefs,
            converged: false,
            hat_diagonals: vec![f64::NAN; n_samples],
            mu: vec![f64::NAN; n_samples],
            log_likelihood: f64::NAN,
        }
    }
}

/// Fits for every feature, stacked into matrices
#[derive(Debug, Clone)]
pub struct GlmFit {
    /// Features x coefficients (natural log scale)
    pub coefficients: Array2<f64>,
    pub standard_errors: Array2<f64>,
    /// Per-feature row-major covariance matrices
    pub covariances: Vec<Vec<f64>>,
    /// Features x samples fitted means
    pub mu: Array2<f64>,
    /// Features x samples hat matrix diagonals
    pub hat_diagonals: Array2<f64>,
    pub converged: Vec<bool>,
}

fn linear_predictor(design: &Array2<f64>, beta: &[f64], row: usize) -> f64 {
    beta.iter()
        .enumerate()
        .map(|(j, &b)| design[[row, j]] * b)
        .sum()
}

fn fitted_means(design: &Array2<f64>, beta: &[f64], size_factors: ArrayView1<f64>) -> Vec<f64> {
    (0..design.nrows())
        .map(|i| nb_mean(linear_predictor(design, beta, i), size_factors[i]).max(MIN_MU))
        .collect()
}

fn total_log_likelihood(counts: &[f64], mu: &[f64], alpha: f64) -> f64 {
    counts
        .iter()
        .zip(mu)
        .map(|(&y, &m)| nb_log_likelihood(y, m, alpha))
        .sum()
}

/// Fit all features in parallel. Features whose dispersion is not finite
/// (all-zero rows) get an unfitted NaN row.
pub fn fit_glm(
    counts: ArrayView2<f64>,
    design: &Array2<f64>,
    size_factors: &Array1<f64>,
    dispersions: &Array1<f64>,
    params: &GlmFitParams,
) -> GlmFit {
    let n_features = counts.nrows();
    let n_samples = counts.ncols();
    let n_coefs = design.ncols();

    let fits: Vec<GlmFitResult> = (0..n_features)
        .into_par_iter()
        .map(|i| {
            let alpha = dispersions[i];
            if !alpha.is_finite() || alpha <= 0.0 {
                return GlmFitResult::unfitted(n_coefs, n_samples);
            }
            fit_single_feature(counts.row(i), design, size_factors.view(), alpha, params)
        })
        .collect();

    let n_unconverged = fits
        .iter()
        .zip(dispersions.iter())
        .filter(|(f, a)| a.is_finite() && !f.converged)
        .count();
    if n_unconverged > 0 {
        log::warn!("{} features did not converge in the GLM fit", n_unconverged);
    }

    let mut coefficients = Array2::zeros((n_features, n_coefs));
    let mut standard_errors = Array2::zeros((n_features, n_coefs));
    let mut mu = Array2::zeros((n_features, n_samples));
    let mut hat_diagonals = Array2::zeros((n_features, n_samples));
    let mut covariances = Vec::with_capacity(n_features);
    let mut converged = Vec::with_capacity(n_features);

    for (i, fit) in fits.into_iter().enumerate() {
        for j in 0..n_coefs {
            coefficients[[i, j]] = fit.coefficients[j];
            standard_errors[[i, j]] = fit.standard_errors[j];
        }
        for j in 0..n_samples {
            mu[[i, j]] = fit.mu[j];
            hat_diagonals[[i, j]] = fit.hat_diagonals[j];
        }
        covariances.push(fit.covariance);
        converged.push(fit.converged);
    }

    GlmFit {
        coefficients,
        standard_errors,
        covariances,
        mu,
        hat_diagonals,
        converged,
    }
}

/// IRLS fit of one feature at a fixed dispersion, with a coordinate-wise
/// Newton fallback when IRLS fails.
pub fn fit_single_feature(
    counts: ArrayView1<f64>,
    design: &Array2<f64>,
    size_factors: ArrayView1<f64>,
    alpha: f64,
    params: &GlmFitParams,
) -> GlmFitResult {
    let n_samples = counts.len();
    let n_coefs = design.ncols();
    let counts_vec = counts.to_vec();

    // OLS start on log(normalized + 0.1)
    let log_counts: Vec<f64> = counts
        .iter()
        .zip(size_factors.iter())
        .map(|(&c, &s)| {
            let norm_ct = if s > 0.0 { c / s } else { 0.0 };
            (norm_ct + 0.1).ln()
        })
        .collect();
    let xtx = weighted_cross_product(design, &vec![1.0; n_samples]);
    let mut xty = vec![0.0; n_coefs];
    for i in 0..n_samples {
        for j in 0..n_coefs {
            xty[j] += design[[i, j]] * log_counts[i];
        }
    }
    let mut beta = solve_symmetric_system(&xtx, &xty, n_coefs);

    if beta.iter().any(|&b| !b.is_finite()) {
        let mean_count: f64 = log_counts.iter().map(|&l| l.exp() - 0.1).sum::<f64>() / n_samples as f64;
        beta = vec![0.0; n_coefs];
        beta[0] = mean_count.max(0.1).ln();
    }
    let ols_beta = beta.clone();

    let mut converged = false;
    let mut dev_old = 0.0f64;
    let mut weights = vec![0.0; n_samples];
    let mut working_response = vec![0.0; n_samples];

    for iter in 0..params.maxit {
        let mus = fitted_means(design, &beta, size_factors);
        for i in 0..n_samples {
            weights[i] = nb_weight(mus[i], alpha);
            working_response[i] =
                (mus[i] / size_factors[i]).ln() + (counts_vec[i] - mus[i]) / mus[i];
        }

        beta = weighted_least_squares_ridge(design, &weights, &working_response);

        if beta.iter().any(|&b| b.abs() > MAX_LFC_BETA) {
            break;
        }

        let mus = fitted_means(design, &beta, size_factors);
        let dev = nb_deviance(&counts_vec, &mus, alpha);
        let conv_test = (dev - dev_old).abs() / (dev.abs() + 0.1);
        if conv_test.is_nan() {
            break;
        }
        if iter > 0 && conv_test < params.beta_tol {
            converged = true;
            break;
        }
        dev_old = dev;
    }

    let row_stable = beta.iter().all(|b| b.is_finite());
    let row_var_positive = fitted_means(design, &beta, size_factors)
        .iter()
        .map(|&m| nb_weight(m, alpha))
        .all(|w| w > 0.0 && w.is_finite());

    if !converged || !row_stable || !row_var_positive {
        let start = if row_stable && beta.iter().all(|b| b.abs() < MAX_LFC_BETA) {
            beta.clone()
        } else {
            ols_beta
        };
        let (fallback_beta, fallback_converged) =
            fit_single_feature_optim(&counts_vec, design, size_factors, alpha, &start);
        beta = fallback_beta;
        converged = fallback_converged;
    }

    let mu = fitted_means(design, &beta, size_factors);
    let weights: Vec<f64> = mu.iter().map(|&m| nb_weight(m, alpha)).collect();
    let (standard_errors, hat_diagonals, covariance) = calculate_standard_errors_and_hat(design, &weights);
    let log_likelihood = total_log_likelihood(&counts_vec, &mu, alpha);

    GlmFitResult {
        coefficients: beta,
        standard_errors,
        covariance,
        n_coefs,
        converged,
        hat_diagonals,
        mu,
        log_likelihood,
    }
}

/// Coordinate-wise Newton-Raphson on the NB log-likelihood.
///
/// Each coefficient is updated with the others held fixed; an Armijo line
/// search guarantees monotone improvement.
///
///   d ll / d beta_k   = sum_j (y_j - mu_j) / (1 + alpha mu_j) X[j,k]
///   d2 ll / d beta_k2 = -sum_j mu_j / (1 + alpha mu_j) X[j,k]^2
fn fit_single_feature_optim(
    counts: &[f64],
    design: &Array2<f64>,
    size_factors: ArrayView1<f64>,
    alpha: f64,
    initial_beta: &[f64],
) -> (Vec<f64>, bool) {
    let n_coefs = design.ncols();
    let max_iter = 5000;
    let tol = 1e-8;
    let armijo_c = 1e-4;

    let compute_ll = |beta: &[f64]| total_log_likelihood(counts, &fitted_means(design, beta, size_factors), alpha);

    let mut beta = initial_beta.to_vec();
    let mut ll_old = compute_ll(&beta);
    let mut converged = false;

    for _ in 0..max_iter {
        let ll_start = ll_old;

        for j in 0..n_coefs {
            let mus = fitted_means(design, &beta, size_factors);
            let mut grad_j = 0.0;
            let mut hess_jj = 0.0;
            for (i, &mu) in mus.iter().enumerate() {
                let x = design[[i, j]];
                grad_j += (counts[i] - mu) / (1.0 + alpha * mu) * x;
                hess_jj -= nb_weight(mu, alpha) * x * x;
            }

            if hess_jj.abs() < 1e-20 {
                continue;
            }
            let delta = -grad_j / hess_jj;
            if delta.abs() < 1e-14 {
                continue;
            }

            let beta_j_old = beta[j];
            let mut step = 1.0;
            let mut improved = false;
            for _ in 0..30 {
                beta[j] = (beta_j_old + step * delta).clamp(-MAX_LFC_BETA, MAX_LFC_BETA);
                let ll_new = compute_ll(&beta);
                if ll_new >= ll_old + armijo_c * step * grad_j * delta {
                    ll_old = ll_new;
                    improved = true;
                    break;
                }
                step *= 0.5;
            }
            if !improved {
                beta[j] = beta_j_old;
            }
        }

        let ll_change = (ll_old - ll_start).abs() / (ll_old.abs() + 0.1);
        if ll_change < tol {
            converged = true;
            break;
        }
    }

    (beta, converged)
}

fn weighted_least_squares_ridge(design: &Array2<f64>, weights: &[f64], response: &[f64]) -> Vec<f64> {
    let n_coefs = design.ncols();
    let mut xtwx = weighted_cross_product(design, weights);
    let lambda = ridge_lambda();
    for j in 0..n_coefs {
        xtwx[j * n_coefs + j] += lambda;
    }

    let mut xtwz = vec![0.0; n_coefs];
    for (i, (&w, &z)) in weights.iter().zip(response).enumerate() {
        for j in 0..n_coefs {
            xtwz[j] += w * design[[i, j]] * z;
        }
    }

    solve_symmetric_system(&xtwx, &xtwz, n_coefs)
}

/// Sandwich covariance (X'WX + λI)⁻¹ X'WX (X'WX + λI)⁻¹ and the hat
/// diagonals h_i = w_i x_i' (X'WX + λI)⁻¹ x_i.
fn calculate_standard_errors_and_hat(design: &Array2<f64>, weights: &[f64]) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let n_samples = design.nrows();
    let n_coefs = design.ncols();

    let xtwx = weighted_cross_product(design, weights);
    let mut xtwx_ridge = xtwx.clone();
    let lambda = ridge_lambda();
    for j in 0..n_coefs {
        xtwx_ridge[j * n_coefs + j] += lambda;
    }
    let ridge_inv = invert_symmetric_matrix(&xtwx_ridge, n_coefs);

    let hat_diagonals = (0..n_samples)
        .map(|i| {
            let mut h = 0.0;
            for j in 0..n_coefs {
                for k in 0..n_coefs {
                    h += design[[i, j]] * ridge_inv[j * n_coefs + k] * design[[i, k]];
                }
            }
            weights[i] * h
        })
        .collect();

    let sigma = mat_mul(&mat_mul(&ridge_inv, &xtwx, n_coefs), &ridge_inv, n_coefs);

    let standard_errors = (0..n_coefs)
        .map(|i| {
            let v = sigma[i * n_coefs + i];
            if v > 0.0 {
                v.sqrt()
            } else {
                f64::NAN
            }
        })
        .collect();

    (standard_errors, hat_diagonals, sigma)
}

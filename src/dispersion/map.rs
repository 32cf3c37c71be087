//! Maximum a posteriori dispersions: empirical Bayes shrinkage of the
//! gene-wise estimates toward the fitted trend.

use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;

use super::gene_wise::max_dispersion;
use super::posterior::{LogPrior, PosteriorInput};
use super::DispersionParams;
use crate::stats::{mad_squared, trigamma};

/// Lower bound on the prior variance of log dispersion
const MIN_PRIOR_VAR: f64 = 0.25;

/// Prior variance of log dispersion around the trend.
///
/// Returns `(prior_var, var_log_disp_ests)` where `var_log_disp_ests` is the
/// squared MAD of the log residuals and `prior_var` subtracts the sampling
/// variance trigamma((m - p) / 2), floored at 0.25.
pub fn estimate_prior_variance(
    gene_dispersions: &[f64],
    trended_dispersions: &[f64],
    n_samples: usize,
    n_coefs: usize,
    min_disp: f64,
) -> (f64, f64) {
    let log_residuals: Vec<f64> = gene_dispersions
        .iter()
        .zip(trended_dispersions)
        .filter(|(&g, &t)| g.is_finite() && t.is_finite() && g >= 100.0 * min_disp && t > 0.0)
        .map(|(&g, &t)| g.ln() - t.ln())
        .collect();

    if log_residuals.len() < 3 {
        return (MIN_PRIOR_VAR, MIN_PRIOR_VAR);
    }

    let var_log_disp_ests = mad_squared(&log_residuals);
    if n_samples <= n_coefs {
        return (MIN_PRIOR_VAR, var_log_disp_ests);
    }

    let df = (n_samples - n_coefs) as f64;
    let prior_var = (var_log_disp_ests - trigamma(df / 2.0)).max(MIN_PRIOR_VAR);

    log::debug!(
        "Dispersion prior: df={}, varLogDispEsts={:.4}, priorVar={:.4}",
        df,
        var_log_disp_ests,
        prior_var
    );

    (prior_var, var_log_disp_ests)
}

/// MAP dispersion for one feature, holding `mu` fixed
pub fn fit_map_dispersion(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    gene_disp: f64,
    trend_disp: f64,
    prior_var: f64,
    params: &DispersionParams,
) -> f64 {
    if !trend_disp.is_finite() || trend_disp <= 0.0 {
        return 0.1;
    }
    if !gene_disp.is_finite() {
        return trend_disp;
    }

    let min_disp = params.min_disp;
    let max_disp = max_dispersion(counts.len());

    // Start at the gene-wise value unless it is far below the trend
    let disp_init = if gene_disp > 0.1 * trend_disp {
        gene_disp
    } else {
        trend_disp
    };
    let start = disp_init.ln().clamp((min_disp / 10.0).ln(), 10.0);

    let posterior = PosteriorInput {
        counts,
        design,
        mu,
        prior: Some(LogPrior {
            mean: trend_disp.ln(),
            variance: prior_var,
        }),
    };
    let outcome = posterior.line_search(start, min_disp, params.kappa_0, params.maxit, params.disp_tol);

    let alpha = if outcome.converged {
        outcome.log_alpha.exp()
    } else {
        posterior.grid_search(min_disp, max_disp)
    };
    alpha.clamp(min_disp, max_disp)
}

/// Result of the MAP stage
#[derive(Debug, Clone)]
pub struct MapDispersions {
    /// Final dispersions (MAP, or gene-wise for upper outliers)
    pub dispersions: Array1<f64>,
    /// Features whose gene-wise estimate was kept as an upper outlier
    pub outliers: Vec<bool>,
    pub prior_var: f64,
    pub var_log_disp_ests: f64,
}

/// Shrink every gene-wise estimate toward the trend.
///
/// Features whose log gene-wise estimate exceeds the log trend by more than
/// `outlier_sd` robust standard deviations keep their gene-wise value.
/// All-zero features stay NaN.
pub fn estimate_map_dispersions(
    counts: ArrayView2<f64>,
    design: &Array2<f64>,
    mu: &Array2<f64>,
    gene_dispersions: &Array1<f64>,
    trended_dispersions: &Array1<f64>,
    params: &DispersionParams,
) -> MapDispersions {
    let n_features = counts.nrows();
    let gene: Vec<f64> = gene_dispersions.to_vec();
    let trend: Vec<f64> = trended_dispersions.to_vec();

    let (prior_var, var_log_disp_ests) =
        estimate_prior_variance(&gene, &trend, counts.ncols(), design.ncols(), params.min_disp);
    let outlier_threshold = params.outlier_sd * var_log_disp_ests.sqrt();

    let results: Vec<(f64, bool)> = (0..n_features)
        .into_par_iter()
        .map(|i| {
            let row = counts.row(i).to_vec();
            if row.iter().all(|&c| c == 0.0) {
                return (f64::NAN, false);
            }
            let (g, t) = (gene[i], trend[i]);
            let is_outlier = g.is_finite() && t.is_finite() && g > 0.0 && t > 0.0 && g.ln() - t.ln() > outlier_threshold;
            if is_outlier {
                return (g, true);
            }
            let feature_mu = mu.row(i).to_vec();
            (fit_map_dispersion(&row, design, &feature_mu, g, t, prior_var, params), false)
        })
        .collect();

    let outliers: Vec<bool> = results.iter().map(|&(_, o)| o).collect();
    log::debug!(
        "MAP dispersions: prior variance {:.4}, {} upper outliers kept at gene-wise values",
        prior_var,
        outliers.iter().filter(|&&o| o).count()
    );

    MapDispersions {
        dispersions: results.into_iter().map(|(d, _)| d).collect(),
        outliers,
        prior_var,
        var_log_disp_ests,
    }
}

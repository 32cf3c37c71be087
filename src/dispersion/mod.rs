//! Dispersion estimation for negative binomial models
//!
//! Three stages: gene-wise Cox-Reid estimates, a trend against the mean of
//! normalized counts, and MAP shrinkage toward that trend.

mod gene_wise;
mod map;
mod posterior;
mod trend;

pub use gene_wise::{estimate_dispersion_feature, estimate_gene_dispersions};
pub use map::{estimate_map_dispersions, estimate_prior_variance, fit_map_dispersion, MapDispersions};
pub use trend::{fit_dispersion_trend, DispersionTrend, TrendFitMethod};

use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{DaaError, Result};

/// Configurable parameters for dispersion estimation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispersionParams {
    /// Lower bound on any dispersion estimate
    pub min_disp: f64,
    /// Log-posterior change that ends the line search
    pub disp_tol: f64,
    /// Initial step size for the line search
    pub kappa_0: f64,
    /// Maximum line-search iterations
    pub maxit: usize,
    /// Robust SDs above the trend beyond which the gene-wise value is kept
    pub outlier_sd: f64,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            min_disp: 1e-8,
            disp_tol: 1e-6,
            kappa_0: 1.0,
            maxit: 100,
            outlier_sd: 2.0,
        }
    }
}

/// All dispersion estimates for a dataset, one entry per feature
#[derive(Debug, Clone)]
pub struct DispersionFit {
    pub gene_wise: Array1<f64>,
    pub trended: Array1<f64>,
    /// Final values used by the GLM (MAP, or gene-wise for outliers)
    pub final_dispersions: Array1<f64>,
    pub trend: DispersionTrend,
    pub prior_var: f64,
    pub outliers: Vec<bool>,
    /// Fitted means from the gene-wise stage
    pub mu: Array2<f64>,
}

/// Run all three dispersion stages
pub fn estimate_dispersions(
    counts: ArrayView2<f64>,
    size_factors: &Array1<f64>,
    base_means: &Array1<f64>,
    design: &Array2<f64>,
    fit_type: TrendFitMethod,
    params: &DispersionParams,
) -> Result<DispersionFit> {
    if design.nrows() <= design.ncols() {
        return Err(DaaError::DegenerateDesign {
            reason: "as many or more coefficients than samples; no replicates for dispersion estimation".to_string(),
        });
    }

    let (gene_wise, mu) = estimate_gene_dispersions(counts, size_factors, design, params);

    if gene_wise.iter().all(|d| d.is_nan()) {
        return Err(DaaError::EmptyData {
            reason: "every feature has zero counts in all samples".to_string(),
        });
    }

    let (trend, trended) =
        fit_dispersion_trend(&base_means.to_vec(), &gene_wise.to_vec(), fit_type, params.min_disp);
    log::info!("Dispersion trend: {:?}", trend);

    let map = estimate_map_dispersions(counts, design, &mu, &gene_wise, &trended, params);

    Ok(DispersionFit {
        gene_wise,
        trended,
        final_dispersions: map.dispersions,
        trend,
        prior_var: map.prior_var,
        outliers: map.outliers,
        mu,
    })
}

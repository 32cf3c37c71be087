//! Count model fitting: design, size factors, dispersions and the NB GLM

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::data::ComposedDataset;
use crate::dispersion::{estimate_dispersions, DispersionFit, DispersionParams, TrendFitMethod};
use crate::error::{DaaError, Result};
use crate::glm::{create_design_matrix, fit_glm, DesignInfo, GlmFit, GlmFitParams};
use crate::normalization::{estimate_size_factors, normalized_counts, SizeFactorMethod};

/// Options for [`fit_model`]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    pub size_factor_method: SizeFactorMethod,
    pub trend_fit: TrendFitMethod,
    pub dispersion: DispersionParams,
    pub glm: GlmFitParams,
}

/// Everything estimated for one dataset and one design factor
#[derive(Debug, Clone)]
pub struct ModelFit {
    pub feature_ids: Vec<String>,
    pub design_info: DesignInfo,
    pub design: Array2<f64>,
    pub size_factors: Array1<f64>,
    /// Mean of normalized counts per feature
    pub base_means: Array1<f64>,
    /// Variance of normalized counts per feature
    pub base_vars: Array1<f64>,
    pub dispersions: DispersionFit,
    pub glm: GlmFit,
    /// True for features with zero counts in every sample
    pub all_zero: Vec<bool>,
}

impl ModelFit {
    pub fn n_features(&self) -> usize {
        self.feature_ids.len()
    }

    /// Final dispersion used for each feature's GLM
    pub fn dispersion(&self, feature_idx: usize) -> f64 {
        self.dispersions.final_dispersions[feature_idx]
    }

    pub fn n_converged(&self) -> usize {
        self.glm.converged.iter().filter(|&&c| c).count()
    }
}

/// Fit the negative binomial model `counts ~ design_factor` for every feature.
///
/// All-zero features are carried through with NaN dispersions and
/// coefficients.
pub fn fit_model(dataset: &ComposedDataset, design_factor: &str, options: &FitOptions) -> Result<ModelFit> {
    let counts = dataset.counts().counts();
    if dataset.n_features() == 0 {
        return Err(DaaError::EmptyData {
            reason: "no features to fit".to_string(),
        });
    }

    let (design, design_info) = create_design_matrix(dataset.metadata(), design_factor)?;
    log::info!(
        "Fitting {} features x {} samples with design ~ {} (reference level '{}')",
        dataset.n_features(),
        dataset.n_samples(),
        design_factor,
        design_info.reference_level()
    );

    let size_factors = estimate_size_factors(counts, options.size_factor_method)?;
    log::debug!("Size factors: {:?}", size_factors.to_vec());

    let normalized = normalized_counts(counts, &size_factors);
    let base_means = normalized.mean_axis(Axis(1)).unwrap_or_else(|| Array1::zeros(counts.nrows()));
    let base_vars = normalized.var_axis(Axis(1), 1.0);
    let all_zero: Vec<bool> = (0..dataset.n_features())
        .map(|i| dataset.counts().is_all_zero(i))
        .collect();

    let dispersions = estimate_dispersions(
        counts,
        &size_factors,
        &base_means,
        &design,
        options.trend_fit,
        &options.dispersion,
    )?;

    let glm = fit_glm(
        counts,
        &design,
        &size_factors,
        &dispersions.final_dispersions,
        &options.glm,
    );

    let fit = ModelFit {
        feature_ids: dataset.feature_ids().to_vec(),
        design_info,
        design,
        size_factors,
        base_means,
        base_vars,
        dispersions,
        glm,
        all_zero,
    };
    log::info!(
        "Model fitted: {} of {} features converged, {} all-zero",
        fit.n_converged(),
        fit.n_features(),
        fit.all_zero.iter().filter(|&&z| z).count()
    );
    Ok(fit)
}

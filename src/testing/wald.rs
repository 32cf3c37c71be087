//! Wald test for differential abundance

use std::f64::consts::LN_2;

use serde::{Deserialize, Serialize};

use super::pvalue::calculate_pvalue;
use crate::data::ComposedDataset;
use crate::error::{DaaError, Result};
use crate::filter::{calculate_cooks_distance, default_cooks_cutoff, flag_cooks_outliers, robust_method_of_moments_disp};
use crate::glm::linalg::quadratic_form;
use crate::io::{Contrast, DaaResults};
use crate::model::ModelFit;
use crate::normalization::normalized_counts;

/// Cook's distance outlier handling before p-value adjustment
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CooksCutoff {
    /// No outlier filtering
    #[default]
    Disabled,
    /// The 0.99 quantile of F(p, m - p)
    Default,
    /// A fixed cutoff
    Value(f64),
}

impl CooksCutoff {
    /// Resolved cutoff, or `None` when filtering is disabled
    pub fn resolve(&self, n_samples: usize, n_coefs: usize) -> Option<f64> {
        match *self {
            CooksCutoff::Disabled => None,
            CooksCutoff::Default => Some(default_cooks_cutoff(n_samples, n_coefs)),
            CooksCutoff::Value(v) => Some(v),
        }
    }
}

/// Options for [`wald_test`]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TestOptions {
    pub cooks_cutoff: CooksCutoff,
}

/// Perform the Wald test of `contrast` for every feature.
///
/// log2FC = c'b / ln 2 and SE = sqrt(c' S c) / ln 2, where c is +1 on the
/// numerator column and -1 on the denominator column. Features that could not
/// be fitted get NA statistics. `padj` is left NA; see [`super::results`].
pub fn wald_test(
    fit: &ModelFit,
    dataset: &ComposedDataset,
    contrast: &Contrast,
    options: &TestOptions,
) -> Result<DaaResults> {
    let design_info = &fit.design_info;
    if contrast.factor != design_info.factor {
        return Err(DaaError::InvalidContrast {
            reason: format!(
                "contrast factor '{}' does not match fitted design factor '{}'",
                contrast.factor, design_info.factor
            ),
        });
    }
    if dataset.feature_ids() != fit.feature_ids.as_slice() {
        return Err(DaaError::InconsistentDataset {
            reason: "dataset features differ from the fitted model".to_string(),
        });
    }

    let c = design_info.contrast_vector(&contrast.numerator, &contrast.denominator)?;
    let c = c.to_vec();
    let n_features = fit.n_features();

    let mut results = DaaResults::new(fit.feature_ids.clone(), contrast.clone());
    results.base_means = fit.base_means.to_vec();
    results.dispersions = fit.dispersions.final_dispersions.to_vec();

    for i in 0..n_features {
        if fit.all_zero[i] {
            continue;
        }

        let beta = fit.glm.coefficients.row(i);
        if beta.iter().any(|b| !b.is_finite()) {
            continue;
        }

        let variance = quadratic_form(&fit.glm.covariances[i], &c);
        if !(variance.is_finite() && variance > 0.0) {
            continue;
        }

        let effect: f64 = beta.iter().zip(&c).map(|(b, w)| b * w).sum();
        let lfc = effect / LN_2;
        let se = variance.sqrt() / LN_2;
        let stat = lfc / se;

        results.log2_fold_changes[i] = lfc;
        results.lfc_se[i] = se;
        results.stat[i] = stat;
        results.pvalues[i] = calculate_pvalue(stat);
    }

    if let Some(cutoff) = options.cooks_cutoff.resolve(dataset.n_samples(), design_info.n_coefs()) {
        let counts = dataset.counts().counts();
        let normalized = normalized_counts(counts, &fit.size_factors);
        let robust_disp = robust_method_of_moments_disp(normalized.view(), &design_info.sample_levels);
        let cooks = calculate_cooks_distance(
            counts,
            &fit.glm.mu,
            &fit.glm.hat_diagonals,
            &robust_disp,
            design_info.n_coefs(),
        );
        let flagged = flag_cooks_outliers(
            counts,
            &cooks,
            &design_info.sample_levels,
            &design_info.level_sizes(),
            cutoff,
        );

        let mut n_flagged = 0;
        for (i, &is_outlier) in flagged.iter().enumerate() {
            if is_outlier && !fit.all_zero[i] {
                results.pvalues[i] = f64::NAN;
                n_flagged += 1;
            }
        }
        log::info!(
            "Cook's distance cutoff {:.3}: {} features flagged as outliers",
            cutoff,
            n_flagged
        );
    }

    log::info!(
        "Wald test ({}): {} of {} features tested",
        contrast,
        results.pvalues.iter().filter(|p| p.is_finite()).count(),
        n_features
    );

    Ok(results)
}

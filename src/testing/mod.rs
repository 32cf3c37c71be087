//! Statistical testing for differential abundance

mod fdr;
mod pvalue;
mod significance;
mod wald;

pub use fdr::benjamini_hochberg;
pub use pvalue::calculate_pvalue;
pub use significance::SignificanceFilter;
pub use wald::{wald_test, CooksCutoff, TestOptions};

use crate::data::ComposedDataset;
use crate::error::Result;
use crate::io::{Contrast, DaaResults};
use crate::model::ModelFit;

/// Wald test followed by Benjamini-Hochberg adjustment
pub fn results(
    fit: &ModelFit,
    dataset: &ComposedDataset,
    contrast: &Contrast,
    options: &TestOptions,
) -> Result<DaaResults> {
    let mut res = wald_test(fit, dataset, contrast, options)?;
    res.padj = benjamini_hochberg(&res.pvalues);
    Ok(res)
}

/// Coefficient names of the fitted design, intercept first
pub fn results_names(fit: &ModelFit) -> &[String] {
    &fit.design_info.coef_names
}

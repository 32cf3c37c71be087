//! Significance filtering on adjusted p-value and effect size

use serde::{Deserialize, Serialize};

use crate::error::{DaaError, Result};
use crate::io::{DaaResults, ResultsSummary};

/// A feature is significant when `padj < alpha` and `|log2FC| >= lfc_threshold`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignificanceFilter {
    pub alpha: f64,
    pub lfc_threshold: f64,
}

impl Default for SignificanceFilter {
    fn default() -> Self {
        Self {
            alpha: 0.01,
            lfc_threshold: 1.0,
        }
    }
}

impl SignificanceFilter {
    pub fn new(alpha: f64, lfc_threshold: f64) -> Result<Self> {
        let filter = Self { alpha, lfc_threshold };
        filter.validate()?;
        Ok(filter)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(DaaError::InvalidInput {
                reason: format!("alpha must be in (0, 1], got {}", self.alpha),
            });
        }
        if !(self.lfc_threshold >= 0.0 && self.lfc_threshold.is_finite()) {
            return Err(DaaError::InvalidInput {
                reason: format!("lfc threshold must be a non-negative number, got {}", self.lfc_threshold),
            });
        }
        Ok(())
    }

    /// NaN in either value fails both comparisons.
    pub fn is_significant(&self, padj: f64, log2_fold_change: f64) -> bool {
        padj < self.alpha && log2_fold_change.abs() >= self.lfc_threshold
    }

    /// Rows passing the filter, in input order
    pub fn filter(&self, results: &DaaResults) -> DaaResults {
        let keep: Vec<usize> = (0..results.n_features())
            .filter(|&i| self.is_significant(results.padj[i], results.log2_fold_changes[i]))
            .collect();
        log::info!(
            "{} of {} features significant (padj < {}, |log2FC| >= {})",
            keep.len(),
            results.n_features(),
            self.alpha,
            self.lfc_threshold
        );
        results.select(&keep)
    }

    pub fn summarize(&self, results: &DaaResults) -> ResultsSummary {
        results.summary(self.alpha, self.lfc_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Contrast;

    #[test]
    fn test_strict_conjunction() {
        let filter = SignificanceFilter::default();
        assert!(!filter.is_significant(0.005, 0.5));
        assert!(!filter.is_significant(0.02, 2.0));
        assert!(filter.is_significant(0.005, 1.5));
        assert!(filter.is_significant(0.005, -1.0));
        assert!(!filter.is_significant(f64::NAN, 3.0));
        assert!(!filter.is_significant(0.001, f64::NAN));
        // padj equal to alpha is not below it
        assert!(!filter.is_significant(0.01, 2.0));
    }

    #[test]
    fn test_filter_preserves_order() {
        let mut res = DaaResults::new(
            vec!["f1".into(), "f2".into(), "f3".into(), "f4".into()],
            Contrast::new("Source", "B", "A"),
        );
        res.padj = vec![0.005, 0.02, 0.001, 0.005];
        res.log2_fold_changes = vec![-2.0, 3.0, 1.5, 0.5];

        let sig = SignificanceFilter::default().filter(&res);
        assert_eq!(sig.feature_ids, vec!["f1", "f3"]);
        assert_eq!(sig.log2_fold_changes, vec![-2.0, 1.5]);
    }

    #[test]
    fn test_validation() {
        assert!(SignificanceFilter::new(0.05, 0.0).is_ok());
        assert!(SignificanceFilter::new(0.0, 1.0).is_err());
        assert!(SignificanceFilter::new(0.05, -1.0).is_err());
    }
}

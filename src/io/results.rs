//! Differential abundance results structure

use std::fmt;

use serde::{Deserialize, Serialize};

/// Results of a differential abundance test, one entry per feature.
///
/// Values that could not be computed are `NaN` and are written as `NA`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaaResults {
    /// Feature identifiers
    pub feature_ids: Vec<String>,
    /// Mean of normalized counts across all samples
    pub base_means: Vec<f64>,
    /// Log2 fold change, numerator over denominator
    pub log2_fold_changes: Vec<f64>,
    /// Standard error of log2 fold change
    pub lfc_se: Vec<f64>,
    /// Wald statistic
    pub stat: Vec<f64>,
    /// Raw p-values
    pub pvalues: Vec<f64>,
    /// Benjamini-Hochberg adjusted p-values
    pub padj: Vec<f64>,
    /// Final (MAP) dispersion used for each feature
    pub dispersions: Vec<f64>,
    /// Contrast that was tested
    pub contrast: Contrast,
}

/// Comparison of two levels of the design factor
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Contrast {
    /// Design factor (metadata field), e.g. "Source"
    pub factor: String,
    /// Numerator level, e.g. "Stool"
    pub numerator: String,
    /// Denominator level, e.g. "Soil"
    pub denominator: String,
}

impl Contrast {
    pub fn new(factor: impl Into<String>, numerator: impl Into<String>, denominator: impl Into<String>) -> Self {
        Self {
            factor: factor.into(),
            numerator: numerator.into(),
            denominator: denominator.into(),
        }
    }
}

impl fmt::Display for Contrast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} vs {}", self.factor, self.numerator, self.denominator)
    }
}

/// One row of [`DaaResults`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureResult {
    pub feature_id: String,
    pub base_mean: f64,
    pub log2_fold_change: f64,
    pub lfc_se: f64,
    pub stat: f64,
    pub pvalue: f64,
    pub padj: f64,
    pub dispersion: f64,
}

impl DaaResults {
    /// Create results with every value NA
    pub fn new(feature_ids: Vec<String>, contrast: Contrast) -> Self {
        let n = feature_ids.len();
        Self {
            feature_ids,
            base_means: vec![f64::NAN; n],
            log2_fold_changes: vec![f64::NAN; n],
            lfc_se: vec![f64::NAN; n],
            stat: vec![f64::NAN; n],
            pvalues: vec![f64::NAN; n],
            padj: vec![f64::NAN; n],
            dispersions: vec![f64::NAN; n],
            contrast,
        }
    }

    /// Get number of features
    pub fn n_features(&self) -> usize {
        self.feature_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feature_ids.is_empty()
    }

    pub fn row(&self, idx: usize) -> FeatureResult {
        FeatureResult {
            feature_id: self.feature_ids[idx].clone(),
            base_mean: self.base_means[idx],
            log2_fold_change: self.log2_fold_changes[idx],
            lfc_se: self.lfc_se[idx],
            stat: self.stat[idx],
            pvalue: self.pvalues[idx],
            padj: self.padj[idx],
            dispersion: self.dispersions[idx],
        }
    }

    pub fn rows(&self) -> Vec<FeatureResult> {
        (0..self.n_features()).map(|i| self.row(i)).collect()
    }

    /// Index of a feature by identifier
    pub fn position(&self, feature_id: &str) -> Option<usize> {
        self.feature_ids.iter().position(|id| id == feature_id)
    }

    /// New results holding only the rows at `indices`, in that order
    pub fn select(&self, indices: &[usize]) -> Self {
        let pick = |values: &[f64]| indices.iter().map(|&i| values[i]).collect::<Vec<f64>>();
        Self {
            feature_ids: indices.iter().map(|&i| self.feature_ids[i].clone()).collect(),
            base_means: pick(&self.base_means),
            log2_fold_changes: pick(&self.log2_fold_changes),
            lfc_se: pick(&self.lfc_se),
            stat: pick(&self.stat),
            pvalues: pick(&self.pvalues),
            padj: pick(&self.padj),
            dispersions: pick(&self.dispersions),
            contrast: self.contrast.clone(),
        }
    }

    /// Summary counts at the given significance thresholds
    pub fn summary(&self, alpha: f64, lfc_threshold: f64) -> ResultsSummary {
        let mut summary = ResultsSummary {
            total_features: self.n_features(),
            features_tested: self.pvalues.iter().filter(|p| p.is_finite()).count(),
            significant: 0,
            enriched: 0,
            depleted: 0,
            alpha,
            lfc_threshold,
        };

        for (&p, &lfc) in self.padj.iter().zip(&self.log2_fold_changes) {
            if p < alpha && lfc.abs() >= lfc_threshold {
                summary.significant += 1;
                if lfc > 0.0 {
                    summary.enriched += 1;
                } else {
                    summary.depleted += 1;
                }
            }
        }
        summary
    }
}

/// Counts of tested and significant features
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsSummary {
    pub total_features: usize,
    pub features_tested: usize,
    pub significant: usize,
    /// Significant with positive log2 fold change
    pub enriched: usize,
    /// Significant with negative log2 fold change
    pub depleted: usize,
    pub alpha: f64,
    pub lfc_threshold: f64,
}

impl fmt::Display for ResultsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Differential Abundance Summary")?;
        writeln!(f, "==============================")?;
        writeln!(f, "Total features: {}", self.total_features)?;
        writeln!(f, "Features tested: {}", self.features_tested)?;
        writeln!(
            f,
            "Significant (padj < {}, |log2FC| >= {}): {}",
            self.alpha, self.lfc_threshold, self.significant
        )?;
        writeln!(f, "  Enriched: {}", self.enriched)?;
        writeln!(f, "  Depleted: {}", self.depleted)?;
        Ok(())
    }
}

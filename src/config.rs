//! Analysis configuration

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DaaError, Result};
use crate::filter::{PrevalenceFilter, SamplePredicate};
use crate::io::Contrast;
use crate::model::FitOptions;
use crate::report::ChartOptions;
use crate::testing::{CooksCutoff, SignificanceFilter, TestOptions};

/// Every setting of one differential abundance run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Samples are kept when they match all of these
    pub sample_predicates: Vec<SamplePredicate>,
    pub prevalence: PrevalenceFilter,
    /// Metadata field used as the single design factor
    pub design_factor: String,
    pub contrast: Contrast,
    pub fit: FitOptions,
    pub cooks_cutoff: CooksCutoff,
    pub significance: SignificanceFilter,
    /// Chart layout. Reference lines always follow `significance.lfc_threshold`.
    pub chart: ChartOptions,
}

impl AnalysisConfig {
    /// Config comparing `numerator` against `denominator` on `design_factor`
    pub fn new(design_factor: &str, numerator: &str, denominator: &str) -> Self {
        Self {
            design_factor: design_factor.to_string(),
            contrast: Contrast::new(design_factor, numerator, denominator),
            ..Self::default()
        }
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn test_options(&self) -> TestOptions {
        TestOptions {
            cooks_cutoff: self.cooks_cutoff,
        }
    }

    /// Chart options with reference lines at the significance threshold
    pub fn chart_options(&self) -> ChartOptions {
        ChartOptions {
            lfc_threshold: self.significance.lfc_threshold,
            ..self.chart
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.design_factor.is_empty() {
            return Err(DaaError::InvalidInput {
                reason: "no design factor given".to_string(),
            });
        }
        if self.contrast.factor != self.design_factor {
            return Err(DaaError::InvalidContrast {
                reason: format!(
                    "contrast factor '{}' differs from design factor '{}'",
                    self.contrast.factor, self.design_factor
                ),
            });
        }
        self.prevalence.validate()?;
        self.significance.validate()?;
        if let CooksCutoff::Value(v) = self.cooks_cutoff {
            if !(v >= 0.0) {
                return Err(DaaError::InvalidInput {
                    reason: format!("Cook's distance cutoff must be non-negative, got {}", v),
                });
            }
        }
        if self.chart.lfc_threshold != self.significance.lfc_threshold {
            log::warn!(
                "Chart lfc_threshold {} ignored; reference lines follow the significance threshold {}",
                self.chart.lfc_threshold,
                self.significance.lfc_threshold
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispersion::TrendFitMethod;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::new("Source", "Stool", "Soil");
        assert_eq!(config.prevalence.min_count, 5.0);
        assert_eq!(config.prevalence.min_fraction, 0.5);
        assert_eq!(config.significance.alpha, 0.01);
        assert_eq!(config.significance.lfc_threshold, 1.0);
        assert_eq!(config.cooks_cutoff, CooksCutoff::Disabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "design_factor": "Source",
                "contrast": {{"factor": "Source", "numerator": "Stool", "denominator": "Soil"}},
                "sample_predicates": [{{"field": "Site", "value": "A"}}],
                "fit": {{"trend_fit": "mean"}},
                "cooks_cutoff": "default"
            }}"#
        )
        .unwrap();

        let config = AnalysisConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.sample_predicates, vec![SamplePredicate::new("Site", "A")]);
        assert_eq!(config.fit.trend_fit, TrendFitMethod::Mean);
        assert_eq!(config.cooks_cutoff, CooksCutoff::Default);
        assert_eq!(config.significance, SignificanceFilter::default());
    }

    #[test]
    fn test_validate_rejects_mismatched_contrast() {
        let mut config = AnalysisConfig::new("Source", "Stool", "Soil");
        config.contrast.factor = "Site".to_string();
        assert!(matches!(config.validate(), Err(DaaError::InvalidContrast { .. })));

        let mut config = AnalysisConfig::new("Source", "Stool", "Soil");
        config.cooks_cutoff = CooksCutoff::Value(-1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_chart_lines_follow_significance_threshold() {
        let mut config = AnalysisConfig::new("Source", "Stool", "Soil");
        config.significance = SignificanceFilter::new(0.05, 2.0).unwrap();
        assert_eq!(config.chart.lfc_threshold, 1.0);
        assert!(config.validate().is_ok());

        let chart = config.chart_options();
        assert_eq!(chart.lfc_threshold, 2.0);
        assert_eq!(chart.x_field, config.chart.x_field);
        assert_eq!(chart.color_field, config.chart.color_field);
    }
}

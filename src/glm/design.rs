//! Design matrix for a single categorical factor

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::data::SampleMetadata;
use crate::error::{DaaError, Result};

/// Layout of a treatment-coded single-factor design
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignInfo {
    /// Metadata field the design is built from
    pub factor: String,
    /// Sorted observed levels; the first is the reference
    pub levels: Vec<String>,
    /// `Intercept` followed by `{factor}_{level}_vs_{reference}`
    pub coef_names: Vec<String>,
    /// Level index of each sample
    pub sample_levels: Vec<usize>,
}

impl DesignInfo {
    pub fn reference_level(&self) -> &str {
        &self.levels[0]
    }

    pub fn n_coefs(&self) -> usize {
        self.coef_names.len()
    }

    pub fn level_index(&self, level: &str) -> Option<usize> {
        self.levels.iter().position(|l| l == level)
    }

    /// Number of samples observed at each level
    pub fn level_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.levels.len()];
        for &l in &self.sample_levels {
            sizes[l] += 1;
        }
        sizes
    }

    /// Contrast vector for `numerator` vs `denominator`.
    ///
    /// Level `k > 0` owns coefficient column `k`; the reference owns none.
    pub fn contrast_vector(&self, numerator: &str, denominator: &str) -> Result<Array1<f64>> {
        if numerator == denominator {
            return Err(DaaError::InvalidContrast {
                reason: format!("numerator and denominator are both '{}'", numerator),
            });
        }

        let mut contrast = Array1::zeros(self.n_coefs());
        for (level, sign) in [(numerator, 1.0), (denominator, -1.0)] {
            let idx = self.level_index(level).ok_or_else(|| DaaError::DegenerateDesign {
                reason: format!(
                    "level '{}' of '{}' has no samples in the fitted data",
                    level, self.factor
                ),
            })?;
            if idx > 0 {
                contrast[idx] = sign;
            }
        }
        Ok(contrast)
    }
}

/// Build the intercept-plus-indicators design for `factor`.
pub fn create_design_matrix(metadata: &SampleMetadata, factor: &str) -> Result<(Array2<f64>, DesignInfo)> {
    if !metadata.has_field(factor) {
        return Err(DaaError::InvalidMetadata {
            reason: format!("design factor '{}' not found in sample metadata", factor),
        });
    }

    let n_samples = metadata.n_samples();
    let mut values = Vec::with_capacity(n_samples);
    for (j, sample_id) in metadata.sample_ids().iter().enumerate() {
        let value = metadata.value(factor, j).ok_or_else(|| DaaError::MissingMetadata {
            sample_id: sample_id.clone(),
            field: Some(factor.to_string()),
        })?;
        values.push(value);
    }

    let levels = metadata.levels(factor).unwrap_or_default();
    if levels.len() < 2 {
        return Err(DaaError::DegenerateDesign {
            reason: format!(
                "factor '{}' has {} observed level(s); at least 2 are needed",
                factor,
                levels.len()
            ),
        });
    }

    let n_coefs = levels.len();
    if n_samples <= n_coefs {
        return Err(DaaError::DegenerateDesign {
            reason: format!(
                "{} samples for {} coefficients leaves no replicates for dispersion estimation",
                n_samples, n_coefs
            ),
        });
    }

    // Column 0 is the intercept; column k flags level k
    let mut design = Array2::zeros((n_samples, n_coefs));
    let mut sample_levels = Vec::with_capacity(n_samples);
    for (i, value) in values.iter().enumerate() {
        design[[i, 0]] = 1.0;
        let k = levels.iter().position(|l| l == value).unwrap_or(0);
        if k > 0 {
            design[[i, k]] = 1.0;
        }
        sample_levels.push(k);
    }

    let reference = &levels[0];
    let mut coef_names = vec!["Intercept".to_string()];
    coef_names.extend(
        levels
            .iter()
            .skip(1)
            .map(|level| format!("{}_{}_vs_{}", factor, level, reference)),
    );

    let info = DesignInfo {
        factor: factor.to_string(),
        levels,
        coef_names,
        sample_levels,
    };
    Ok((design, info))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(groups: &[&str]) -> SampleMetadata {
        let ids: Vec<String> = (1..=groups.len()).map(|i| format!("S{}", i)).collect();
        let mut meta = SampleMetadata::new(ids).unwrap();
        meta.add_field("Source", groups.iter().map(|s| s.to_string()).collect())
            .unwrap();
        meta
    }

    #[test]
    fn test_design_matrix_treatment_coding() {
        let meta = metadata(&["soil", "gut", "gut", "soil", "water"]);
        let (design, info) = create_design_matrix(&meta, "Source").unwrap();

        assert_eq!(info.levels, vec!["gut", "soil", "water"]);
        assert_eq!(info.reference_level(), "gut");
        assert_eq!(
            info.coef_names,
            vec!["Intercept", "Source_soil_vs_gut", "Source_water_vs_gut"]
        );
        assert_eq!(design.row(0).to_vec(), vec![1.0, 1.0, 0.0]);
        assert_eq!(design.row(1).to_vec(), vec![1.0, 0.0, 0.0]);
        assert_eq!(design.row(4).to_vec(), vec![1.0, 0.0, 1.0]);
        assert_eq!(info.level_sizes(), vec![2, 2, 1]);
    }

    #[test]
    fn test_single_level_is_degenerate() {
        let meta = metadata(&["gut", "gut", "gut"]);
        assert!(matches!(
            create_design_matrix(&meta, "Source"),
            Err(DaaError::DegenerateDesign { .. })
        ));
    }

    #[test]
    fn test_no_replicates_is_degenerate() {
        let meta = metadata(&["gut", "soil"]);
        assert!(matches!(
            create_design_matrix(&meta, "Source"),
            Err(DaaError::DegenerateDesign { .. })
        ));
    }

    #[test]
    fn test_missing_value_and_unknown_factor() {
        let meta = metadata(&["gut", "NA", "soil", "soil"]);
        assert!(matches!(
            create_design_matrix(&meta, "Source"),
            Err(DaaError::MissingMetadata { ref sample_id, .. }) if sample_id == "S2"
        ));
        assert!(matches!(
            create_design_matrix(&meta, "Depth"),
            Err(DaaError::InvalidMetadata { .. })
        ));
    }

    #[test]
    fn test_contrast_vectors() {
        let meta = metadata(&["a", "a", "b", "b", "c", "c"]);
        let (_, info) = create_design_matrix(&meta, "Source").unwrap();

        assert_eq!(info.contrast_vector("b", "a").unwrap().to_vec(), vec![0.0, 1.0, 0.0]);
        assert_eq!(info.contrast_vector("a", "c").unwrap().to_vec(), vec![0.0, 0.0, -1.0]);
        assert_eq!(info.contrast_vector("c", "b").unwrap().to_vec(), vec![0.0, -1.0, 1.0]);
        assert!(matches!(
            info.contrast_vector("b", "b"),
            Err(DaaError::InvalidContrast { .. })
        ));
        assert!(matches!(
            info.contrast_vector("z", "a"),
            Err(DaaError::DegenerateDesign { .. })
        ));
    }
}

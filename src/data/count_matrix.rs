//! Abundance matrix for amplicon feature counts

use std::collections::HashSet;

use ndarray::{Array2, ArrayView2, Axis};

use crate::error::{DaaError, Result};

fn find_duplicate(ids: &[String]) -> Option<&str> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().find(|id| !seen.insert(id.as_str())).map(|s| s.as_str())
}

/// Feature abundance matrix.
/// Rows are features (ASVs/OTUs), columns are samples.
#[derive(Debug, Clone, PartialEq)]
pub struct CountMatrix {
    /// Raw count data (features x samples)
    counts: Array2<f64>,
    /// Feature identifiers
    feature_ids: Vec<String>,
    /// Sample identifiers
    sample_ids: Vec<String>,
}

impl CountMatrix {
    /// Create a new count matrix from raw data
    pub fn new(
        counts: Array2<f64>,
        feature_ids: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self> {
        let (n_features, n_samples) = counts.dim();

        if feature_ids.len() != n_features {
            return Err(DaaError::DimensionMismatch {
                expected: format!("{} feature IDs", n_features),
                got: format!("{} feature IDs", feature_ids.len()),
            });
        }

        if sample_ids.len() != n_samples {
            return Err(DaaError::DimensionMismatch {
                expected: format!("{} sample IDs", n_samples),
                got: format!("{} sample IDs", sample_ids.len()),
            });
        }

        if counts.iter().any(|&x| x < 0.0 || !x.is_finite()) {
            return Err(DaaError::InvalidCountMatrix {
                reason: "Counts must be non-negative finite values".to_string(),
            });
        }

        // Keys are join keys for taxonomy, tree and metadata
        if let Some(dup) = find_duplicate(&feature_ids) {
            return Err(DaaError::InvalidCountMatrix {
                reason: format!("Duplicate feature ID '{}'", dup),
            });
        }
        if let Some(dup) = find_duplicate(&sample_ids) {
            return Err(DaaError::InvalidCountMatrix {
                reason: format!("Duplicate sample ID '{}'", dup),
            });
        }

        if counts.iter().any(|&x| x != x.round()) {
            log::warn!(
                "Some count values are not integers. The negative binomial model expects \
                 integer counts; non-integer values may affect the fit."
            );
        }

        Ok(Self {
            counts,
            feature_ids,
            sample_ids,
        })
    }

    pub fn n_features(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    /// Get the raw counts as a view
    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    pub fn feature_ids(&self) -> &[String] {
        &self.feature_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn feature_index(&self, feature_id: &str) -> Option<usize> {
        self.feature_ids.iter().position(|id| id == feature_id)
    }

    pub fn sample_index(&self, sample_id: &str) -> Option<usize> {
        self.sample_ids.iter().position(|id| id == sample_id)
    }

    /// Sum of counts per sample (sequencing depth)
    pub fn library_sizes(&self) -> Vec<f64> {
        self.counts
            .axis_iter(Axis(1))
            .map(|col| col.sum())
            .collect()
    }

    /// True if the feature has zero counts in every sample
    pub fn is_all_zero(&self, feature_idx: usize) -> bool {
        self.counts.row(feature_idx).iter().all(|&x| x == 0.0)
    }

    /// Subset to specific samples, in the given order
    pub fn subset_samples(&self, sample_indices: &[usize]) -> Result<Self> {
        let new_counts = self.counts.select(Axis(1), sample_indices);
        let new_sample_ids: Vec<String> = sample_indices
            .iter()
            .map(|&i| self.sample_ids[i].clone())
            .collect();

        Self::new(new_counts, self.feature_ids.clone(), new_sample_ids)
    }

    /// Subset to specific features, in the given order
    pub fn subset_features(&self, feature_indices: &[usize]) -> Result<Self> {
        let new_counts = self.counts.select(Axis(0), feature_indices);
        let new_feature_ids: Vec<String> = feature_indices
            .iter()
            .map(|&i| self.feature_ids[i].clone())
            .collect();

        Self::new(new_counts, new_feature_ids, self.sample_ids.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn test_count_matrix_creation() {
        let counts = array![[10.0, 20.0, 30.0], [5.0, 15.0, 25.0]];
        let matrix = CountMatrix::new(counts, ids("F", 2), ids("S", 3)).unwrap();
        assert_eq!(matrix.n_features(), 2);
        assert_eq!(matrix.n_samples(), 3);
        assert_eq!(matrix.feature_index("F2"), Some(1));
    }

    #[test]
    fn test_negative_counts_rejected() {
        let counts = array![[10.0, -5.0], [5.0, 15.0]];
        let result = CountMatrix::new(counts, ids("F", 2), ids("S", 2));
        assert!(matches!(result, Err(DaaError::InvalidCountMatrix { .. })));
    }

    #[test]
    fn test_duplicate_feature_rejected() {
        let counts = array![[1.0, 2.0], [3.0, 4.0]];
        let result = CountMatrix::new(
            counts,
            vec!["ASV1".to_string(), "ASV1".to_string()],
            ids("S", 2),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_library_sizes_and_zero_rows() {
        let counts = array![[10.0, 20.0], [0.0, 0.0], [5.0, 15.0]];
        let matrix = CountMatrix::new(counts, ids("F", 3), ids("S", 2)).unwrap();
        assert_eq!(matrix.library_sizes(), vec![15.0, 35.0]);
        assert!(matrix.is_all_zero(1));
        assert!(!matrix.is_all_zero(0));
    }

    #[test]
    fn test_subsets_keep_labels_aligned() {
        let counts = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let matrix = CountMatrix::new(counts, ids("F", 2), ids("S", 3)).unwrap();

        let cols = matrix.subset_samples(&[2, 0]).unwrap();
        assert_eq!(cols.sample_ids(), &["S3".to_string(), "S1".to_string()]);
        assert_eq!(cols.counts()[[1, 0]], 6.0);

        let rows = matrix.subset_features(&[1]).unwrap();
        assert_eq!(rows.feature_ids(), &["F2".to_string()]);
        assert_eq!(rows.counts()[[0, 2]], 6.0);
    }
}

//! Prevalence-based feature pruning

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::data::ComposedDataset;
use crate::error::{DaaError, Result};

/// Keep a feature when at least `min_fraction` of samples have a count
/// strictly greater than `min_count`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrevalenceFilter {
    pub min_count: f64,
    pub min_fraction: f64,
}

impl Default for PrevalenceFilter {
    fn default() -> Self {
        Self {
            min_count: 5.0,
            min_fraction: 0.5,
        }
    }
}

impl PrevalenceFilter {
    pub fn new(min_count: f64, min_fraction: f64) -> Result<Self> {
        let filter = Self {
            min_count,
            min_fraction,
        };
        filter.validate()?;
        Ok(filter)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_fraction) {
            return Err(DaaError::InvalidInput {
                reason: format!(
                    "prevalence fraction must be between 0 and 1, got {}",
                    self.min_fraction
                ),
            });
        }
        if !self.min_count.is_finite() {
            return Err(DaaError::InvalidInput {
                reason: "prevalence count threshold must be finite".to_string(),
            });
        }
        Ok(())
    }

    /// Whether a feature with these counts is retained.
    ///
    /// The observed fraction is compared directly, so `7 / 100` meets a
    /// `min_fraction` of `0.07` exactly.
    pub fn keeps<'a>(&self, counts: impl IntoIterator<Item = &'a f64>) -> bool {
        let mut n = 0usize;
        let mut above = 0usize;
        for &c in counts {
            n += 1;
            if c > self.min_count {
                above += 1;
            }
        }
        if n == 0 {
            return self.min_fraction == 0.0;
        }
        above as f64 / n as f64 >= self.min_fraction
    }
}

/// Feature counts before and after pruning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterReport {
    pub before: usize,
    pub after: usize,
}

impl FilterReport {
    pub fn removed(&self) -> usize {
        self.before - self.after
    }

    pub fn retention_rate(&self) -> f64 {
        if self.before == 0 {
            0.0
        } else {
            self.after as f64 / self.before as f64
        }
    }
}

impl fmt::Display for FilterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Prevalence filter: {} -> {} features ({} removed, {:.1}% retained)",
            self.before,
            self.after,
            self.removed(),
            self.retention_rate() * 100.0
        )
    }
}

/// Drop low-prevalence features. Matrix rows, taxonomy and tree leaves are
/// pruned together.
pub fn prune_features(
    dataset: &ComposedDataset,
    filter: &PrevalenceFilter,
) -> Result<(ComposedDataset, FilterReport)> {
    filter.validate()?;

    let counts = dataset.counts().counts();
    let keep: Vec<usize> = (0..dataset.n_features())
        .into_par_iter()
        .filter(|&i| filter.keeps(counts.row(i)))
        .collect();

    if keep.is_empty() {
        return Err(DaaError::EmptyData {
            reason: format!(
                "no feature has counts above {} in at least {:.0}% of samples",
                filter.min_count,
                filter.min_fraction * 100.0
            ),
        });
    }

    let report = FilterReport {
        before: dataset.n_features(),
        after: keep.len(),
    };
    log::info!("{}", report);

    let pruned = if keep.len() == dataset.n_features() {
        dataset.clone()
    } else {
        dataset.subset_features(&keep)?
    };
    Ok((pruned, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{AssemblyOptions, CountMatrix, PhyloTree, SampleMetadata, TaxonomyRecord};
    use ndarray::array;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn dataset() -> ComposedDataset {
        let counts = CountMatrix::new(
            array![
                [6.0, 6.0, 0.0, 0.0],
                [6.0, 0.0, 0.0, 0.0],
                [5.0, 5.0, 5.0, 5.0],
                [9.0, 8.0, 7.0, 0.0]
            ],
            strings(&["F1", "F2", "F3", "F4"]),
            strings(&["S1", "S2", "S3", "S4"]),
        )
        .unwrap();
        let mut meta = SampleMetadata::new(strings(&["S1", "S2", "S3", "S4"])).unwrap();
        meta.add_field("Source", strings(&["a", "a", "b", "b"])).unwrap();
        let taxonomy = ["F1", "F2", "F3", "F4"]
            .iter()
            .map(|id| TaxonomyRecord::new(*id, "k__Bacteria"))
            .collect();
        let tree = PhyloTree::from_newick("((F1:1,F2:1):1,(F3:1,F4:1):1);").unwrap();
        ComposedDataset::assemble(counts, taxonomy, Some(tree), meta, &AssemblyOptions::default()).unwrap()
    }

    #[test]
    fn test_prevalence_rule_boundaries() {
        let filter = PrevalenceFilter::default();
        // exactly half the samples above 5 is enough
        assert!(filter.keeps(&[6.0, 6.0, 0.0, 0.0]));
        assert!(!filter.keeps(&[6.0, 0.0, 0.0, 0.0]));
        // strictly greater than the count threshold
        assert!(!filter.keeps(&[5.0, 5.0, 5.0, 5.0]));
    }

    #[test]
    fn test_fraction_boundary_is_exact() {
        // 0.07 * 100 rounds above 7 in f64; 7 of 100 samples must still pass
        let filter = PrevalenceFilter::new(5.0, 0.07).unwrap();
        let mut counts = vec![0.0; 100];
        counts[..7].fill(10.0);
        assert!(filter.keeps(&counts));
        counts[6] = 0.0;
        assert!(!filter.keeps(&counts));

        let thirds = PrevalenceFilter::new(5.0, 1.0 / 3.0).unwrap();
        assert!(thirds.keeps(&[6.0, 0.0, 0.0]));
        assert!(!PrevalenceFilter::default().keeps(&Vec::<f64>::new()));
        assert!(PrevalenceFilter::new(5.0, 0.0).unwrap().keeps(&Vec::<f64>::new()));
    }

    #[test]
    fn test_prune_keeps_keys_aligned() {
        let ds = dataset();
        let (pruned, report) = prune_features(&ds, &PrevalenceFilter::default()).unwrap();

        let kept = strings(&["F1", "F4"]);
        assert_eq!(pruned.feature_ids(), &kept[..]);
        assert_eq!(pruned.taxonomy().feature_ids(), &kept[..]);
        let mut leaves = pruned.tree().unwrap().leaf_labels();
        leaves.sort();
        assert_eq!(leaves, vec!["F1", "F4"]);

        assert_eq!(report.before, 4);
        assert_eq!(report.after, 2);
        assert_eq!(report.removed(), 2);
        assert!((report.retention_rate() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_nothing_retained() {
        let ds = dataset();
        let strict = PrevalenceFilter::new(100.0, 0.5).unwrap();
        assert!(matches!(
            prune_features(&ds, &strict),
            Err(DaaError::EmptyData { .. })
        ));
    }

    #[test]
    fn test_invalid_fraction() {
        assert!(PrevalenceFilter::new(5.0, 1.5).is_err());
    }
}

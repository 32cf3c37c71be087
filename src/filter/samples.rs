//! Sample selection by metadata predicates

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::data::ComposedDataset;
use crate::error::{DaaError, Result};

/// Exact-match predicate `field == value` on sample metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplePredicate {
    pub field: String,
    pub value: String,
}

impl SamplePredicate {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Parse the command-line form `Field=Value`
    pub fn parse(s: &str) -> Result<Self> {
        match s.split_once('=') {
            Some((field, value)) if !field.trim().is_empty() => {
                Ok(Self::new(field.trim(), value.trim()))
            }
            _ => Err(DaaError::InvalidInput {
                reason: format!("sample predicate '{}' is not of the form Field=Value", s),
            }),
        }
    }
}

impl FromStr for SamplePredicate {
    type Err = DaaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for SamplePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.field, self.value)
    }
}

/// Keep the samples that satisfy every predicate.
///
/// An empty predicate list returns an unchanged copy. Applying the same
/// predicates again yields the same dataset.
pub fn select_samples(dataset: &ComposedDataset, predicates: &[SamplePredicate]) -> Result<ComposedDataset> {
    if predicates.is_empty() {
        return Ok(dataset.clone());
    }

    let metadata = dataset.metadata();
    let mut columns = Vec::with_capacity(predicates.len());
    for predicate in predicates {
        let column = metadata.field(&predicate.field).ok_or_else(|| DaaError::InvalidMetadata {
            reason: format!("field '{}' not found in sample metadata", predicate.field),
        })?;
        columns.push((column, predicate.value.as_str()));
    }

    let keep: Vec<usize> = (0..dataset.n_samples())
        .filter(|&j| columns.iter().all(|(column, value)| column[j] == *value))
        .collect();

    if keep.is_empty() {
        let described: Vec<String> = predicates.iter().map(|p| p.to_string()).collect();
        return Err(DaaError::EmptySelection {
            reason: format!("no sample matches {}", described.join(" and ")),
        });
    }

    log::info!(
        "Sample selection kept {} of {} samples",
        keep.len(),
        dataset.n_samples()
    );

    if keep.len() == dataset.n_samples() {
        return Ok(dataset.clone());
    }
    dataset.subset_samples(&keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{AssemblyOptions, CountMatrix, SampleMetadata, TaxonomyRecord};
    use ndarray::array;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn dataset() -> ComposedDataset {
        let counts = CountMatrix::new(
            array![[1.0, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]],
            strings(&["F1", "F2"]),
            strings(&["S1", "S2", "S3", "S4"]),
        )
        .unwrap();
        let mut meta = SampleMetadata::new(strings(&["S1", "S2", "S3", "S4"])).unwrap();
        meta.add_field("Source", strings(&["Environmental", "Environmental", "Host", "Environmental"]))
            .unwrap();
        meta.add_field("Site", strings(&["A", "B", "A", "A"])).unwrap();
        let taxonomy = vec![
            TaxonomyRecord::new("F1", "k__Bacteria"),
            TaxonomyRecord::new("F2", "k__Bacteria"),
        ];
        ComposedDataset::assemble(counts, taxonomy, None, meta, &AssemblyOptions::default()).unwrap()
    }

    #[test]
    fn test_parse_predicate() {
        let p = SamplePredicate::parse("Source=Environmental").unwrap();
        assert_eq!(p, SamplePredicate::new("Source", "Environmental"));
        assert!(SamplePredicate::parse("Source").is_err());
        assert!(SamplePredicate::parse("=x").is_err());
    }

    #[test]
    fn test_conjunction_of_predicates() {
        let ds = dataset();
        let selected = select_samples(
            &ds,
            &[
                SamplePredicate::new("Source", "Environmental"),
                SamplePredicate::new("Site", "A"),
            ],
        )
        .unwrap();
        assert_eq!(selected.sample_ids(), &strings(&["S1", "S4"])[..]);
        assert_eq!(selected.counts().counts()[[1, 1]], 8.0);
        selected.check_invariants().unwrap();
    }

    #[test]
    fn test_selection_is_idempotent() {
        let ds = dataset();
        let predicates = [SamplePredicate::new("Source", "Environmental")];
        let once = select_samples(&ds, &predicates).unwrap();
        let twice = select_samples(&once, &predicates).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_predicates_copy() {
        let ds = dataset();
        assert_eq!(select_samples(&ds, &[]).unwrap(), ds);
    }

    #[test]
    fn test_no_match_and_unknown_field() {
        let ds = dataset();
        let none = select_samples(&ds, &[SamplePredicate::new("Source", "Marine")]);
        assert!(matches!(none, Err(DaaError::EmptySelection { .. })));

        let unknown = select_samples(&ds, &[SamplePredicate::new("Depth", "1")]);
        assert!(matches!(unknown, Err(DaaError::InvalidMetadata { .. })));
    }
}

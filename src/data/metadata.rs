//! Per-sample metadata

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{DaaError, Result};

/// True for the textual encodings of a missing value
pub fn is_missing_value(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v == "NA"
}

/// Sample metadata: one row per sample, named text fields in file order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMetadata {
    /// Sample identifiers
    sample_ids: Vec<String>,
    /// Field names in the order they were added
    field_names: Vec<String>,
    /// Field name -> value for each sample
    fields: HashMap<String, Vec<String>>,
}

impl SampleMetadata {
    /// Create metadata for the given samples, with no fields yet
    pub fn new(sample_ids: Vec<String>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(sample_ids.len());
        for id in &sample_ids {
            if !seen.insert(id.as_str()) {
                return Err(DaaError::InvalidInput {
                    reason: format!("Duplicate sample ID '{}' in metadata", id),
                });
            }
        }
        Ok(Self {
            sample_ids,
            field_names: Vec::new(),
            fields: HashMap::new(),
        })
    }

    /// Add a field column. Re-adding a field replaces its values.
    pub fn add_field(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        if values.len() != self.sample_ids.len() {
            return Err(DaaError::DimensionMismatch {
                expected: format!("{} values", self.sample_ids.len()),
                got: format!("{} values", values.len()),
            });
        }
        if !self.fields.contains_key(name) {
            self.field_names.push(name.to_string());
        }
        self.fields.insert(name.to_string(), values);
        Ok(())
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    /// Raw column for a field, including missing entries
    pub fn field(&self, name: &str) -> Option<&[String]> {
        self.fields.get(name).map(|v| v.as_slice())
    }

    /// Value of a field for one sample; `None` when missing
    pub fn value(&self, field: &str, sample_idx: usize) -> Option<&str> {
        self.fields
            .get(field)
            .and_then(|v| v.get(sample_idx))
            .map(|s| s.as_str())
            .filter(|s| !is_missing_value(s))
    }

    /// Parse a field as continuous. Missing entries become `None`.
    pub fn continuous(&self, field: &str) -> Result<Vec<Option<f64>>> {
        let values = self.fields.get(field).ok_or_else(|| DaaError::InvalidMetadata {
            reason: format!("field '{}' not found", field),
        })?;

        values
            .iter()
            .zip(&self.sample_ids)
            .map(|(v, sample)| {
                if is_missing_value(v) {
                    return Ok(None);
                }
                v.trim().parse::<f64>().map(Some).map_err(|_| DaaError::InvalidMetadata {
                    reason: format!(
                        "field '{}' has non-numeric value '{}' for sample '{}'",
                        field, v, sample
                    ),
                })
            })
            .collect()
    }

    /// Sorted distinct non-missing values of a field
    pub fn levels(&self, field: &str) -> Option<Vec<String>> {
        self.fields.get(field).map(|values| {
            let mut unique: Vec<String> = values
                .iter()
                .filter(|v| !is_missing_value(v))
                .cloned()
                .collect();
            unique.sort();
            unique.dedup();
            unique
        })
    }

    /// Indices of samples whose field equals `level`
    pub fn samples_with_level(&self, field: &str, level: &str) -> Vec<usize> {
        self.fields
            .get(field)
            .map(|values| {
                values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.as_str() == level)
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn sample_index(&self, sample_id: &str) -> Option<usize> {
        self.sample_ids.iter().position(|id| id == sample_id)
    }

    /// Subset to specific samples, in the given order
    pub fn subset(&self, sample_indices: &[usize]) -> Result<Self> {
        let new_ids: Vec<String> = sample_indices
            .iter()
            .map(|&i| self.sample_ids[i].clone())
            .collect();

        let mut new_meta = SampleMetadata::new(new_ids)?;

        for name in &self.field_names {
            let values = &self.fields[name];
            let new_values: Vec<String> = sample_indices
                .iter()
                .map(|&i| values[i].clone())
                .collect();
            new_meta.add_field(name, new_values)?;
        }

        Ok(new_meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn example() -> SampleMetadata {
        let mut meta = SampleMetadata::new(strings(&["s1", "s2", "s3", "s4"])).unwrap();
        meta.add_field("Source", strings(&["gut", "gut", "soil", "NA"]))
            .unwrap();
        meta.add_field("Depth", strings(&["1.5", "", "3", "4"])).unwrap();
        meta
    }

    #[test]
    fn test_levels_skip_missing() {
        let meta = example();
        assert_eq!(meta.levels("Source").unwrap(), vec!["gut", "soil"]);
        assert_eq!(meta.samples_with_level("Source", "gut"), vec![0, 1]);
        assert_eq!(meta.value("Source", 3), None);
        assert_eq!(meta.field_names(), &strings(&["Source", "Depth"])[..]);
    }

    #[test]
    fn test_continuous_field() {
        let meta = example();
        let depth = meta.continuous("Depth").unwrap();
        assert_eq!(depth, vec![Some(1.5), None, Some(3.0), Some(4.0)]);
        assert!(matches!(meta.continuous("Source"), Err(DaaError::InvalidMetadata { .. })));
        assert!(matches!(meta.continuous("pH"), Err(DaaError::InvalidMetadata { .. })));
    }

    #[test]
    fn test_duplicate_sample_rejected() {
        assert!(SampleMetadata::new(strings(&["s1", "s1"])).is_err());
    }

    #[test]
    fn test_subset_reorders() {
        let meta = example();
        let sub = meta.subset(&[2, 0]).unwrap();
        assert_eq!(sub.sample_ids(), &strings(&["s3", "s1"])[..]);
        assert_eq!(sub.value("Source", 0), Some("soil"));
        assert_eq!(sub.field_names().len(), 2);
    }
}

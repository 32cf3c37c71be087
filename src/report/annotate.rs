//! Joining test results with taxonomic lineages

use serde::{Deserialize, Serialize};

use crate::data::{ComposedDataset, Lineage, TaxRank};
use crate::error::{DaaError, Result};
use crate::io::{DaaResults, FeatureResult};

/// Numeric column of a result row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueField {
    BaseMean,
    #[default]
    Log2FoldChange,
    LfcSe,
    Stat,
    Pvalue,
    Padj,
}

/// A result row with the feature's seven-rank lineage attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedRow {
    #[serde(flatten)]
    pub result: FeatureResult,
    pub lineage: Lineage,
}

impl AnnotatedRow {
    pub fn feature_id(&self) -> &str {
        &self.result.feature_id
    }

    pub fn rank(&self, rank: TaxRank) -> &str {
        self.lineage.at(rank)
    }

    pub fn value(&self, field: ValueField) -> f64 {
        let r = &self.result;
        match field {
            ValueField::BaseMean => r.base_mean,
            ValueField::Log2FoldChange => r.log2_fold_change,
            ValueField::LfcSe => r.lfc_se,
            ValueField::Stat => r.stat,
            ValueField::Pvalue => r.pvalue,
            ValueField::Padj => r.padj,
        }
    }
}

/// Left join of `results` onto the dataset taxonomy by feature key.
pub fn annotate(results: &DaaResults, dataset: &ComposedDataset) -> Result<Vec<AnnotatedRow>> {
    let taxonomy = dataset.taxonomy();
    (0..results.n_features())
        .map(|i| {
            let result = results.row(i);
            let lineage = taxonomy
                .lineage(&result.feature_id)
                .cloned()
                .ok_or_else(|| DaaError::MissingAnnotation {
                    feature_id: result.feature_id.clone(),
                })?;
            Ok(AnnotatedRow { result, lineage })
        })
        .collect()
}

//! Input/Output operations for microbiome datasets and results

mod csv;
mod results;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use self::csv::{
    read_feature_table, read_metadata, read_taxonomy, read_tree, write_chart_json, write_normalized_counts,
    write_results,
};
pub use results::{Contrast, DaaResults, FeatureResult, ResultsSummary};

use crate::data::{AssemblyOptions, ComposedDataset};
use crate::error::Result;

/// Locations of the input files for one analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPaths {
    pub feature_table: PathBuf,
    pub taxonomy: PathBuf,
    pub tree: Option<PathBuf>,
    pub metadata: PathBuf,
}

/// Read every input and join them into a [`ComposedDataset`]
pub fn load_dataset(paths: &InputPaths, options: &AssemblyOptions) -> Result<ComposedDataset> {
    let counts = read_feature_table(&paths.feature_table)?;
    let taxonomy = read_taxonomy(&paths.taxonomy)?;
    let tree = paths.tree.as_ref().map(read_tree).transpose()?;
    let metadata = read_metadata(&paths.metadata)?;

    ComposedDataset::assemble(counts, taxonomy, tree, metadata, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MetadataPolicy;
    use crate::error::DaaError;
    use std::fs;
    use tempfile::TempDir;

    fn write_inputs(dir: &TempDir, metadata: &str) -> InputPaths {
        let path = |name: &str| dir.path().join(name);
        fs::write(path("table.tsv"), "#OTU ID\tS1\tS2\tS3\nASV1\t10\t20\t30\nASV2\t5\t0\t8\n").unwrap();
        fs::write(
            path("taxonomy.tsv"),
            "Feature ID\tTaxon\tConfidence\nASV1\tk__Bacteria; p__Firmicutes\t0.9\nASV2\tk__Bacteria\t0.8\nASV9\tk__Archaea\t0.7\n",
        )
        .unwrap();
        fs::write(path("tree.nwk"), "((ASV1:0.1,ASV2:0.2):0.1,ASV9:0.5);").unwrap();
        fs::write(path("metadata.tsv"), metadata).unwrap();
        InputPaths {
            feature_table: path("table.tsv"),
            taxonomy: path("taxonomy.tsv"),
            tree: Some(path("tree.nwk")),
            metadata: path("metadata.tsv"),
        }
    }

    #[test]
    fn test_load_dataset_prunes_orphans() {
        let dir = TempDir::new().unwrap();
        let paths = write_inputs(&dir, "sample-id\tSource\nS1\tGut\nS2\tGut\nS3\tSoil\nS4\tSoil\n");
        let dataset = load_dataset(&paths, &AssemblyOptions::default()).unwrap();

        assert_eq!(dataset.n_features(), 2);
        assert_eq!(dataset.n_samples(), 3);
        assert_eq!(dataset.taxonomy().len(), 2);
        let tree = dataset.tree().unwrap();
        assert_eq!(tree.n_leaves(), 2);
        assert!(!tree.has_leaf("ASV9"));
    }

    #[test]
    fn test_load_dataset_missing_metadata() {
        let dir = TempDir::new().unwrap();
        let paths = write_inputs(&dir, "sample-id\tSource\nS1\tGut\nS2\tSoil\n");

        let strict = load_dataset(&paths, &AssemblyOptions::default());
        assert!(matches!(strict, Err(DaaError::MissingMetadata { sample_id, .. }) if sample_id == "S3"));

        let lenient = AssemblyOptions {
            metadata_policy: MetadataPolicy::DropWithWarning,
            ..AssemblyOptions::default()
        };
        let dataset = load_dataset(&paths, &lenient).unwrap();
        assert_eq!(dataset.sample_ids(), &["S1", "S2"]);
    }
}

//! ComposedDataset - abundance, taxonomy, tree and sample metadata under one key space

use serde::{Deserialize, Serialize};

use super::{CountMatrix, PhyloTree, SampleMetadata, TaxonomyParseOptions, TaxonomyRecord, TaxonomyTable};
use crate::error::{DaaError, Result};

/// How samples without a metadata row are handled during assembly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MetadataPolicy {
    /// A sample without metadata is a fatal error
    #[default]
    Strict,
    /// Drop samples without metadata and log a warning
    DropWithWarning,
}

/// Options for [`ComposedDataset::assemble`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssemblyOptions {
    pub taxonomy: TaxonomyParseOptions,
    pub metadata_policy: MetadataPolicy,
}

/// Abundance matrix, taxonomy, optional tree and metadata, re-keyed so that
/// matrix rows, taxonomy keys and tree leaves are the same feature set, and
/// matrix columns match the metadata samples in order.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedDataset {
    counts: CountMatrix,
    taxonomy: TaxonomyTable,
    tree: Option<PhyloTree>,
    metadata: SampleMetadata,
}

impl ComposedDataset {
    /// Compose already-aligned parts. Fails if the key spaces differ.
    pub fn new(
        counts: CountMatrix,
        taxonomy: TaxonomyTable,
        tree: Option<PhyloTree>,
        metadata: SampleMetadata,
    ) -> Result<Self> {
        let dataset = Self {
            counts,
            taxonomy,
            tree,
            metadata,
        };
        dataset.check_invariants()?;
        Ok(dataset)
    }

    /// Join raw inputs on feature and sample keys.
    ///
    /// Every matrix feature needs a taxonomy row (and a tree leaf, when a
    /// tree is given). Every matrix sample needs a metadata row unless
    /// [`MetadataPolicy::DropWithWarning`] is selected. Orphan taxonomy rows,
    /// extra tree leaves and metadata rows for unknown samples are dropped.
    pub fn assemble(
        counts: CountMatrix,
        taxonomy: Vec<TaxonomyRecord>,
        tree: Option<PhyloTree>,
        metadata: SampleMetadata,
        options: &AssemblyOptions,
    ) -> Result<Self> {
        let taxonomy = TaxonomyTable::from_records(taxonomy, &options.taxonomy)?;

        // Samples: matrix order wins
        let mut matrix_idx = Vec::with_capacity(counts.n_samples());
        let mut metadata_idx = Vec::with_capacity(counts.n_samples());
        for (j, sample_id) in counts.sample_ids().iter().enumerate() {
            match metadata.sample_index(sample_id) {
                Some(k) => {
                    matrix_idx.push(j);
                    metadata_idx.push(k);
                }
                None => match options.metadata_policy {
                    MetadataPolicy::Strict => {
                        return Err(DaaError::MissingMetadata {
                            sample_id: sample_id.clone(),
                            field: None,
                        })
                    }
                    MetadataPolicy::DropWithWarning => {
                        log::warn!("Dropping sample '{}': no metadata row", sample_id);
                    }
                },
            }
        }
        if matrix_idx.is_empty() {
            return Err(DaaError::EmptySelection {
                reason: "no sample in the feature table has metadata".to_string(),
            });
        }
        let extra_metadata = metadata.n_samples() - metadata_idx.len();
        if extra_metadata > 0 {
            log::debug!(
                "Dropped {} metadata rows for samples absent from the feature table",
                extra_metadata
            );
        }

        let counts = if matrix_idx.len() == counts.n_samples() {
            counts
        } else {
            counts.subset_samples(&matrix_idx)?
        };
        let metadata = metadata.subset(&metadata_idx)?;

        // Features: every matrix row must be annotated
        let orphans = taxonomy
            .feature_ids()
            .iter()
            .filter(|id| counts.feature_index(id).is_none())
            .count();
        if orphans > 0 {
            log::debug!("Dropped {} taxonomy rows for features absent from the feature table", orphans);
        }
        let taxonomy = taxonomy.select(counts.feature_ids())?;

        let tree = match tree {
            Some(tree) => {
                if let Some(missing) = counts.feature_ids().iter().find(|id| !tree.has_leaf(id)) {
                    return Err(DaaError::MissingTreeLeaf {
                        feature_id: missing.clone(),
                    });
                }
                if tree.n_leaves() > counts.n_features() {
                    log::debug!(
                        "Pruning {} tree leaves absent from the feature table",
                        tree.n_leaves() - counts.n_features()
                    );
                    Some(tree.prune(counts.feature_ids())?)
                } else {
                    Some(tree)
                }
            }
            None => None,
        };

        log::info!(
            "Assembled dataset: {} features x {} samples{}",
            counts.n_features(),
            counts.n_samples(),
            if tree.is_some() { " with tree" } else { "" }
        );

        Self::new(counts, taxonomy, tree, metadata)
    }

    /// Verify the shared key spaces
    pub fn check_invariants(&self) -> Result<()> {
        if self.taxonomy.feature_ids() != self.counts.feature_ids() {
            return Err(DaaError::InconsistentDataset {
                reason: "taxonomy keys differ from matrix feature keys".to_string(),
            });
        }

        if let Some(tree) = &self.tree {
            let same_leaves = tree.n_leaves() == self.counts.n_features()
                && self.counts.feature_ids().iter().all(|id| tree.has_leaf(id));
            if !same_leaves {
                return Err(DaaError::InconsistentDataset {
                    reason: "tree leaves differ from matrix feature keys".to_string(),
                });
            }
        }

        if self.metadata.sample_ids() != self.counts.sample_ids() {
            return Err(DaaError::InconsistentDataset {
                reason: "metadata samples differ from matrix sample keys".to_string(),
            });
        }

        Ok(())
    }

    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    pub fn taxonomy(&self) -> &TaxonomyTable {
        &self.taxonomy
    }

    pub fn tree(&self) -> Option<&PhyloTree> {
        self.tree.as_ref()
    }

    pub fn metadata(&self) -> &SampleMetadata {
        &self.metadata
    }

    pub fn n_features(&self) -> usize {
        self.counts.n_features()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.n_samples()
    }

    pub fn feature_ids(&self) -> &[String] {
        self.counts.feature_ids()
    }

    pub fn sample_ids(&self) -> &[String] {
        self.counts.sample_ids()
    }

    /// New dataset restricted to the given samples
    pub fn subset_samples(&self, sample_indices: &[usize]) -> Result<Self> {
        Self::new(
            self.counts.subset_samples(sample_indices)?,
            self.taxonomy.clone(),
            self.tree.clone(),
            self.metadata.subset(sample_indices)?,
        )
    }

    /// New dataset restricted to the given features; taxonomy and tree follow
    pub fn subset_features(&self, feature_indices: &[usize]) -> Result<Self> {
        let counts = self.counts.subset_features(feature_indices)?;
        let taxonomy = self.taxonomy.select(counts.feature_ids())?;
        let tree = match &self.tree {
            Some(tree) if feature_indices.len() < self.n_features() => {
                Some(tree.prune(counts.feature_ids())?)
            }
            other => other.clone(),
        };
        Self::new(counts, taxonomy, tree, self.metadata.clone())
    }
}

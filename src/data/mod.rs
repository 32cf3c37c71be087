//! Data structures for composed microbiome datasets

mod count_matrix;
mod dataset;
mod metadata;
mod taxonomy;
mod tree;

pub use count_matrix::CountMatrix;
pub use dataset::{AssemblyOptions, ComposedDataset, MetadataPolicy};
pub use metadata::{is_missing_value, SampleMetadata};
pub use taxonomy::{
    parse_lineage, Lineage, TaxRank, TaxonomyParseOptions, TaxonomyRecord, TaxonomyTable, N_RANKS,
    UNASSIGNED,
};
pub use tree::{PhyloTree, TreeNode};

//! Error types for microbiome_deseq

use thiserror::Error;

/// Main error type for differential abundance operations
#[derive(Error, Debug)]
pub enum DaaError {
    #[error("Missing taxonomic annotation for feature '{feature_id}'")]
    MissingAnnotation { feature_id: String },

    #[error("Missing metadata for sample '{sample_id}'{}", field_suffix(.field))]
    MissingMetadata {
        sample_id: String,
        field: Option<String>,
    },

    #[error("Malformed taxonomy string for feature '{feature_id}': {reason}")]
    MalformedTaxonomyString { feature_id: String, reason: String },

    #[error("Empty selection: {reason}")]
    EmptySelection { reason: String },

    #[error("Degenerate design: {reason}")]
    DegenerateDesign { reason: String },

    #[error("Feature '{feature_id}' is not a leaf of the phylogenetic tree")]
    MissingTreeLeaf { feature_id: String },

    #[error("Invalid count matrix: {reason}")]
    InvalidCountMatrix { reason: String },

    #[error("Invalid metadata: {reason}")]
    InvalidMetadata { reason: String },

    #[error("Invalid tree: {reason}")]
    InvalidTree { reason: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Inconsistent dataset: {reason}")]
    InconsistentDataset { reason: String },

    #[error("Invalid contrast specification: {reason}")]
    InvalidContrast { reason: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Empty data: {reason}")]
    EmptyData { reason: String },

    #[error("Size factor estimation failed: {reason}")]
    SizeFactorFailed { reason: String },

    #[error("Trend fitting failed: {reason}")]
    TrendFittingFailed { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

fn field_suffix(field: &Option<String>) -> String {
    field
        .as_ref()
        .map(|f| format!(" (field '{}')", f))
        .unwrap_or_default()
}

/// Result type alias for differential abundance operations
pub type Result<T> = std::result::Result<T, DaaError>;

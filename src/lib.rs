//! microbiome_deseq: differential abundance analysis for microbiome count data
//!
//! Finds taxa enriched or depleted between two levels of a sample grouping
//! factor, using a negative binomial GLM with DESeq2-style size factors,
//! dispersion shrinkage and Wald tests.
//!
//! # Example
//!
//! ```ignore
//! use microbiome_deseq::prelude::*;
//!
//! let paths = InputPaths {
//!     feature_table: "table.tsv".into(),
//!     taxonomy: "taxonomy.tsv".into(),
//!     tree: Some("tree.nwk".into()),
//!     metadata: "metadata.tsv".into(),
//! };
//! let dataset = load_dataset(&paths, &AssemblyOptions::default())?;
//!
//! let config = AnalysisConfig::new("Source", "Stool", "Soil");
//! let analysis = run_analysis(&dataset, &config)?;
//! write_results("results.tsv", &analysis.annotated)?;
//! ```

pub mod cli;
pub mod config;
pub mod data;
pub mod dispersion;
pub mod error;
pub mod filter;
pub mod glm;
pub mod io;
pub mod model;
pub mod normalization;
pub mod report;
pub mod stats;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::AnalysisConfig;
    pub use crate::data::{
        AssemblyOptions, ComposedDataset, CountMatrix, Lineage, MetadataPolicy, PhyloTree, SampleMetadata, TaxRank,
        TaxonomyRecord, TaxonomyTable,
    };
    pub use crate::dispersion::{DispersionParams, TrendFitMethod};
    pub use crate::error::{DaaError, Result};
    pub use crate::filter::{prune_features, select_samples, FilterReport, PrevalenceFilter, SamplePredicate};
    pub use crate::glm::{DesignInfo, GlmFitParams};
    pub use crate::io::{
        load_dataset, read_feature_table, read_metadata, read_taxonomy, read_tree, write_chart_json,
        write_normalized_counts, write_results, Contrast, DaaResults, InputPaths, ResultsSummary,
    };
    pub use crate::model::{fit_model, FitOptions, ModelFit};
    pub use crate::normalization::{estimate_size_factors, normalized_counts, SizeFactorMethod};
    pub use crate::report::{annotate, chart_series, display_order, Aggregator, AnnotatedRow, ChartOptions, ChartSeries};
    pub use crate::testing::{benjamini_hochberg, results, wald_test, CooksCutoff, SignificanceFilter, TestOptions};
    pub use crate::{run_analysis, Analysis};
}

use prelude::*;

/// Every intermediate of one analysis run
#[derive(Debug, Clone)]
pub struct Analysis {
    /// Dataset after sample selection and prevalence filtering
    pub dataset: ComposedDataset,
    pub filter_report: FilterReport,
    pub fit: ModelFit,
    /// Test results for every retained feature
    pub results: DaaResults,
    /// Rows passing the significance filter
    pub significant: DaaResults,
    /// Significant rows with their lineages
    pub annotated: Vec<AnnotatedRow>,
    pub chart: ChartSeries,
}

impl Analysis {
    pub fn summary(&self, config: &AnalysisConfig) -> ResultsSummary {
        config.significance.summarize(&self.results)
    }
}

/// Run sample selection, prevalence filtering, model fitting, testing,
/// significance filtering and annotation on an assembled dataset.
pub fn run_analysis(dataset: &ComposedDataset, config: &AnalysisConfig) -> Result<Analysis> {
    config.validate()?;

    let selected = select_samples(dataset, &config.sample_predicates)?;
    if !config.sample_predicates.is_empty() {
        log::info!(
            "Selected {} of {} samples",
            selected.n_samples(),
            dataset.n_samples()
        );
    }

    let (filtered, filter_report) = prune_features(&selected, &config.prevalence)?;

    let fit = fit_model(&filtered, &config.design_factor, &config.fit)?;
    let all_results = results(&fit, &filtered, &config.contrast, &config.test_options())?;
    let significant = config.significance.filter(&all_results);
    let annotated = annotate(&significant, &filtered)?;
    let chart = chart_series(&annotated, &config.chart_options());

    Ok(Analysis {
        dataset: filtered,
        filter_report,
        fit,
        results: all_results,
        significant,
        annotated,
        chart,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    const N_FEATURES: usize = 20;

    fn feature_id(i: usize) -> String {
        format!("F{:02}", i + 1)
    }

    /// 2 Gut + 2 Soil samples. F01 is strongly enriched in Gut, F02 is
    /// stable, F20 is all-zero, the rest are flat around 30 to 100.
    fn dataset() -> ComposedDataset {
        let mut counts = Array2::zeros((N_FEATURES, 4));
        let rows: Vec<[f64; 4]> = (0..N_FEATURES)
            .map(|i| match i {
                0 => [100.0, 120.0, 5.0, 4.0],
                1 => [50.0, 52.0, 48.0, 51.0],
                19 => [0.0; 4],
                _ => {
                    let b = 30.0 + 4.0 * i as f64;
                    [b, b + 3.0, b + 1.0, b + 2.0]
                }
            })
            .collect();
        for (i, row) in rows.iter().enumerate() {
            for (j, &c) in row.iter().enumerate() {
                counts[[i, j]] = c;
            }
        }
        let feature_ids: Vec<String> = (0..N_FEATURES).map(feature_id).collect();
        let sample_ids: Vec<String> = ["S1", "S2", "S3", "S4"].iter().map(|s| s.to_string()).collect();
        let matrix = CountMatrix::new(counts, feature_ids.clone(), sample_ids.clone()).unwrap();

        let phyla = ["Firmicutes", "Bacteroidetes", "Proteobacteria"];
        let taxonomy = feature_ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                TaxonomyRecord::new(
                    id.clone(),
                    format!(
                        "k__Bacteria; p__{}; c__C{}; o__O{}; f__Family{}",
                        phyla[i % 3],
                        i % 3,
                        i % 3,
                        i % 5
                    ),
                )
            })
            .collect();

        let leaves: Vec<String> = feature_ids.iter().map(|id| format!("{}:0.1", id)).collect();
        let tree = PhyloTree::from_newick(&format!("({});", leaves.join(","))).unwrap();

        let mut metadata = SampleMetadata::new(sample_ids).unwrap();
        metadata
            .add_field("Source", ["Gut", "Gut", "Soil", "Soil"].iter().map(|s| s.to_string()).collect())
            .unwrap();
        metadata
            .add_field("Site", ["A", "A", "A", "B"].iter().map(|s| s.to_string()).collect())
            .unwrap();

        ComposedDataset::assemble(matrix, taxonomy, Some(tree), metadata, &AssemblyOptions::default()).unwrap()
    }

    #[test]
    fn test_full_pipeline_flags_only_the_shifted_feature() {
        let ds = dataset();
        let config = AnalysisConfig::new("Source", "Gut", "Soil");
        let analysis = run_analysis(&ds, &config).unwrap();

        // The all-zero feature fails prevalence
        assert_eq!(analysis.filter_report.before, 20);
        assert_eq!(analysis.filter_report.after, 19);
        assert!(analysis.dataset.check_invariants().is_ok());
        assert_eq!(analysis.dataset.tree().unwrap().n_leaves(), 19);

        assert_eq!(analysis.significant.feature_ids, vec!["F01"]);
        let idx = analysis.results.position("F01").unwrap();
        assert!(analysis.results.log2_fold_changes[idx] > 3.0);

        let stable = analysis.results.position("F02").unwrap();
        assert!(analysis.results.log2_fold_changes[stable].abs() < 1.0);

        assert_eq!(analysis.annotated.len(), 1);
        assert_eq!(analysis.annotated[0].rank(TaxRank::Phylum), "Firmicutes");
        assert_eq!(analysis.chart.points.len(), 1);
        assert_eq!(analysis.chart.x_order, vec!["Family0"]);

        let summary = analysis.summary(&config);
        assert_eq!(summary.significant, 1);
        assert_eq!(summary.enriched, 1);
    }

    #[test]
    fn test_chart_reference_lines_track_significance_threshold() {
        let ds = dataset();
        let mut config = AnalysisConfig::new("Source", "Gut", "Soil");
        config.significance = SignificanceFilter::new(0.01, 2.0).unwrap();
        let analysis = run_analysis(&ds, &config).unwrap();

        assert_eq!(analysis.significant.feature_ids, vec!["F01"]);
        assert_eq!(analysis.chart.reference_lines, vec![-2.0, 2.0]);
    }

    #[test]
    fn test_all_zero_feature_is_not_available() {
        let ds = dataset();
        let mut config = AnalysisConfig::new("Source", "Gut", "Soil");
        config.prevalence = PrevalenceFilter::new(5.0, 0.0).unwrap();
        let analysis = run_analysis(&ds, &config).unwrap();

        let idx = analysis.results.position("F20").unwrap();
        assert!(analysis.fit.all_zero[idx]);
        assert!(analysis.results.log2_fold_changes[idx].is_nan());
        assert!(analysis.results.pvalues[idx].is_nan());
        assert!(analysis.results.padj[idx].is_nan());
        assert!(analysis.fit.dispersion(idx).is_nan());
        assert_eq!(analysis.significant.feature_ids, vec!["F01"]);
    }

    #[test]
    fn test_sample_selection_can_degenerate_design() {
        let ds = dataset();
        let mut config = AnalysisConfig::new("Source", "Gut", "Soil");
        config.sample_predicates = vec![SamplePredicate::new("Source", "Gut")];

        let err = run_analysis(&ds, &config).unwrap_err();
        assert!(matches!(err, DaaError::DegenerateDesign { .. }));
    }

    #[test]
    fn test_unknown_predicate_value_is_empty_selection() {
        let ds = dataset();
        let mut config = AnalysisConfig::new("Source", "Gut", "Soil");
        config.sample_predicates = vec![SamplePredicate::new("Site", "Z")];

        let err = run_analysis(&ds, &config).unwrap_err();
        assert!(matches!(err, DaaError::EmptySelection { .. }));
    }

    #[test]
    fn test_cooks_default_cutoff_runs() {
        let ds = dataset();
        let mut config = AnalysisConfig::new("Source", "Gut", "Soil");
        config.cooks_cutoff = CooksCutoff::Default;

        // No level has three replicates, so nothing can be flagged
        let filtered = run_analysis(&ds, &config).unwrap();
        let plain = run_analysis(&ds, &AnalysisConfig::new("Source", "Gut", "Soil")).unwrap();
        assert_eq!(
            filtered.results.pvalues.iter().filter(|p| p.is_nan()).count(),
            plain.results.pvalues.iter().filter(|p| p.is_nan()).count()
        );
        assert_eq!(filtered.significant.feature_ids, plain.significant.feature_ids);
    }
}

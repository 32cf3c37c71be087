//! Command-line interface for microbiome_deseq

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::AnalysisConfig;
use crate::data::{AssemblyOptions, MetadataPolicy, TaxonomyParseOptions};
use crate::dispersion::TrendFitMethod;
use crate::error::{DaaError, Result};
use crate::filter::{PrevalenceFilter, SamplePredicate};
use crate::io::{Contrast, InputPaths};
use crate::normalization::SizeFactorMethod;
use crate::testing::{CooksCutoff, SignificanceFilter};

#[derive(Parser)]
#[command(name = "microbiome_deseq")]
#[command(version)]
#[command(about = "Differential abundance analysis for microbiome count data")]
#[command(disable_help_flag = true)]
#[command(disable_version_flag = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a differential abundance analysis
    #[command(
        about = "Run a differential abundance analysis",
        long_about = "Run a differential abundance analysis\n\n\
            Joins the feature table, taxonomy, tree and sample metadata, selects\n\
            samples, drops low-prevalence features, fits a negative binomial model\n\
            per feature and reports the taxa that differ between two levels of the\n\
            design factor.",
        after_long_help = "\
Examples:
  # Stool vs soil samples, significant taxa only
  microbiome_deseq run --features table.tsv --taxonomy taxonomy.tsv \\
    --metadata metadata.tsv --tree tree.nwk \\
    --design Source --numerator Stool --denominator Soil -o results.tsv

  # Restrict to one site, keep every tested feature and write the chart data
  microbiome_deseq run --features table.tsv --taxonomy taxonomy.tsv \\
    --metadata metadata.tsv --select Site=North --design Source \\
    --numerator Stool --denominator Soil --all-results --chart chart.json"
    )]
    Run(RunArgs),

    /// Normalize count data only
    #[command(
        long_about = "Normalize a feature table by median-of-ratios size factors.\n\n\
            Outputs a matrix of normalized counts (raw counts / size factors).",
        after_long_help = "\
Examples:
  microbiome_deseq normalize --features table.tsv -o normalized.tsv
  microbiome_deseq normalize --features table.tsv -o normalized.tsv -m poscounts"
    )]
    Normalize {
        /// Path to the feature table
        #[arg(short, long)]
        features: String,

        /// Output file path
        #[arg(short, long)]
        output: String,

        /// Normalization method [default: ratio]
        #[arg(short, long, default_value = "ratio",
            long_help = "Size factor method.\n\
                ratio:     Median of ratios over features present in every sample\n\
                poscounts: Geometric means over positive counts only (sparse tables)")]
        method: String,
    },
}

/// Options of the `run` subcommand
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Path to the feature table
    #[arg(short, long,
        long_help = "Path to the feature (ASV/OTU) table.\n\
            Format: first column = feature IDs, remaining columns = counts per sample.\n\
            Tab or comma delimited (auto-detected). A BIOM-style '#OTU ID' header is accepted.")]
    pub features: String,

    /// Path to the taxonomy table
    #[arg(long,
        long_help = "Path to the taxonomy table with 'Feature ID', 'Taxon' and optional\n\
            'Confidence' columns, as exported by QIIME2.")]
    pub taxonomy: String,

    /// Path to sample metadata
    #[arg(short, long,
        long_help = "Path to sample metadata.\n\
            Format: first column = sample IDs, remaining columns = metadata fields.\n\
            QIIME2 '#q2:' directive rows are skipped.")]
    pub metadata: String,

    /// Path to a Newick tree
    #[arg(long)]
    pub tree: Option<String>,

    /// Keep samples with Field=Value (repeatable)
    #[arg(long, value_name = "FIELD=VALUE",
        long_help = "Keep only samples whose metadata field equals the value.\n\
            Can be given several times; a sample must match all of them.")]
    pub select: Vec<String>,

    /// Prevalence count threshold [default: 5]
    #[arg(long, default_value = "5")]
    pub min_count: f64,

    /// Fraction of samples above --min-count needed to keep a feature [default: 0.5]
    #[arg(long, default_value = "0.5")]
    pub min_fraction: f64,

    /// Design factor (metadata field)
    #[arg(short, long, required_unless_present = "config")]
    pub design: Option<String>,

    /// Numerator level of the contrast
    #[arg(long, required_unless_present = "config")]
    pub numerator: Option<String>,

    /// Denominator level of the contrast
    #[arg(long, required_unless_present = "config")]
    pub denominator: Option<String>,

    /// Read analysis settings from a JSON file
    #[arg(long, value_name = "JSON",
        conflicts_with_all = [
            "design", "numerator", "denominator", "select", "min_count", "min_fraction",
            "alpha", "lfc_threshold", "cooks_filter", "cooks_cutoff", "fit_type", "sf_type",
        ],
        long_help = "Read the analysis settings (sample selection, prevalence, design,\n\
            contrast, fitting, outlier and significance options) from a JSON file.\n\
            Omitted keys take their defaults. Cannot be combined with the flags it replaces.")]
    pub config: Option<String>,

    /// Adjusted p-value threshold [default: 0.01]
    #[arg(short, long, default_value = "0.01")]
    pub alpha: f64,

    /// Minimum absolute log2 fold change [default: 1]
    #[arg(long, default_value = "1")]
    pub lfc_threshold: f64,

    /// Flag outlier-driven features by Cook's distance
    #[arg(long,
        long_help = "Set p-values to NA for features whose largest Cook's distance exceeds\n\
            the cutoff. Only samples in levels with at least 3 replicates count.\n\
            The cutoff defaults to the 0.99 quantile of F(p, m - p).")]
    pub cooks_filter: bool,

    /// Cook's distance cutoff (implies --cooks-filter)
    #[arg(long)]
    pub cooks_cutoff: Option<f64>,

    /// Dispersion trend fit method [default: parametric]
    #[arg(long, default_value = "parametric",
        long_help = "Dispersion-mean trend fitting method.\n\
            parametric: asymptDisp + extraPois / mean, Gamma GLM\n\
            mean:       trimmed mean of gene-wise dispersions")]
    pub fit_type: String,

    /// Size factor method [default: ratio]
    #[arg(long, default_value = "ratio")]
    pub sf_type: String,

    /// Drop samples without metadata instead of failing
    #[arg(long)]
    pub lenient_metadata: bool,

    /// Keep 'k__'-style rank prefixes in taxon names
    #[arg(long)]
    pub keep_prefixes: bool,

    /// Output file path [default: results.tsv]
    #[arg(short, long, default_value = "results.tsv")]
    pub output: String,

    /// Write every tested feature, not only significant ones
    #[arg(long)]
    pub all_results: bool,

    /// Write the effect-size chart series as JSON
    #[arg(long, value_name = "PATH")]
    pub chart: Option<String>,

    /// Number of threads (0 = auto) [default: 0]
    #[arg(short = 't', long, default_value = "0")]
    pub threads: usize,
}

impl RunArgs {
    pub fn input_paths(&self) -> InputPaths {
        InputPaths {
            feature_table: PathBuf::from(&self.features),
            taxonomy: PathBuf::from(&self.taxonomy),
            tree: self.tree.as_ref().map(PathBuf::from),
            metadata: PathBuf::from(&self.metadata),
        }
    }

    pub fn assembly_options(&self) -> AssemblyOptions {
        AssemblyOptions {
            taxonomy: TaxonomyParseOptions {
                strip_prefixes: !self.keep_prefixes,
            },
            metadata_policy: if self.lenient_metadata {
                MetadataPolicy::DropWithWarning
            } else {
                MetadataPolicy::Strict
            },
        }
    }

    /// Build and validate the analysis configuration
    pub fn to_config(&self) -> Result<AnalysisConfig> {
        if let Some(path) = &self.config {
            return AnalysisConfig::from_json_file(path);
        }
        let design = required(&self.design, "--design")?;
        let numerator = required(&self.numerator, "--numerator")?;
        let denominator = required(&self.denominator, "--denominator")?;

        let sample_predicates = self
            .select
            .iter()
            .map(|s| SamplePredicate::parse(s))
            .collect::<Result<Vec<_>>>()?;

        let cooks_cutoff = match (self.cooks_cutoff, self.cooks_filter) {
            (Some(v), _) => CooksCutoff::Value(v),
            (None, true) => CooksCutoff::Default,
            (None, false) => CooksCutoff::Disabled,
        };

        let mut config = AnalysisConfig {
            sample_predicates,
            prevalence: PrevalenceFilter::new(self.min_count, self.min_fraction)?,
            design_factor: design.to_string(),
            contrast: Contrast::new(design, numerator, denominator),
            cooks_cutoff,
            significance: SignificanceFilter::new(self.alpha, self.lfc_threshold)?,
            ..AnalysisConfig::default()
        };
        config.fit.trend_fit = self.fit_type.parse::<TrendFitMethod>()?;
        config.fit.size_factor_method = self.sf_type.parse::<SizeFactorMethod>()?;

        config.validate()?;
        Ok(config)
    }
}

fn required<'a>(value: &'a Option<String>, flag: &str) -> Result<&'a str> {
    value.as_deref().ok_or_else(|| DaaError::InvalidInput {
        reason: format!("{} is required without --config", flag),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse_run(argv: Vec<&str>) -> RunArgs {
        match Cli::try_parse_from(argv).unwrap().command {
            Some(Commands::Run(args)) => args,
            _ => panic!("expected run subcommand"),
        }
    }

    fn parse(extra: &[&str]) -> RunArgs {
        let mut argv = vec![
            "microbiome_deseq",
            "run",
            "--features",
            "table.tsv",
            "--taxonomy",
            "taxonomy.tsv",
            "--metadata",
            "metadata.tsv",
            "--design",
            "Source",
            "--numerator",
            "Stool",
            "--denominator",
            "Soil",
        ];
        argv.extend_from_slice(extra);
        parse_run(argv)
    }

    #[test]
    fn test_run_defaults() {
        let args = parse(&[]);
        let config = args.to_config().unwrap();

        assert_eq!(config.prevalence, PrevalenceFilter::default());
        assert_eq!(config.significance, SignificanceFilter::default());
        assert_eq!(config.cooks_cutoff, CooksCutoff::Disabled);
        assert_eq!(config.contrast, Contrast::new("Source", "Stool", "Soil"));
        assert_eq!(args.output, "results.tsv");
        assert!(args.input_paths().tree.is_none());
        assert_eq!(args.assembly_options(), AssemblyOptions::default());
    }

    #[test]
    fn test_run_options() {
        let args = parse(&[
            "--select",
            "Site=North",
            "--select",
            "Year=2019",
            "--cooks-filter",
            "--fit-type",
            "mean",
            "--sf-type",
            "poscounts",
            "--lenient-metadata",
            "--keep-prefixes",
            "--lfc-threshold",
            "2",
            "-v",
        ]);
        let config = args.to_config().unwrap();

        assert_eq!(config.sample_predicates.len(), 2);
        assert_eq!(config.sample_predicates[1], SamplePredicate::new("Year", "2019"));
        assert_eq!(config.cooks_cutoff, CooksCutoff::Default);
        assert_eq!(config.fit.trend_fit, TrendFitMethod::Mean);
        assert_eq!(config.fit.size_factor_method, SizeFactorMethod::PosCounts);
        assert_eq!(config.chart_options().lfc_threshold, 2.0);
        assert_eq!(args.assembly_options().metadata_policy, MetadataPolicy::DropWithWarning);
        assert!(!args.assembly_options().taxonomy.strip_prefixes);
    }

    #[test]
    fn test_run_rejects_bad_values() {
        assert!(parse(&["--fit-type", "local"]).to_config().is_err());
        assert!(parse(&["--select", "Site"]).to_config().is_err());
        assert!(parse(&["--min-fraction", "1.5"]).to_config().is_err());
        let explicit = parse(&["--cooks-cutoff", "4.5"]).to_config().unwrap();
        assert_eq!(explicit.cooks_cutoff, CooksCutoff::Value(4.5));
    }

    #[test]
    fn test_config_file_replaces_flags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "design_factor": "Source",
                "contrast": {{"factor": "Source", "numerator": "Stool", "denominator": "Soil"}},
                "significance": {{"alpha": 0.05, "lfc_threshold": 2.0}}
            }}"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap();

        let args = parse_run(vec![
            "microbiome_deseq", "run", "--features", "table.tsv", "--taxonomy", "taxonomy.tsv",
            "--metadata", "metadata.tsv", "--config", path,
        ]);
        assert!(args.design.is_none());
        let config = args.to_config().unwrap();
        assert_eq!(config, AnalysisConfig::from_json_file(path).unwrap());
        assert_eq!(config.significance.alpha, 0.05);

        let clash = Cli::try_parse_from([
            "microbiome_deseq", "run", "--features", "table.tsv", "--taxonomy", "taxonomy.tsv",
            "--metadata", "metadata.tsv", "--config", path, "--design", "Source",
        ]);
        assert!(clash.is_err());

        let missing = Cli::try_parse_from([
            "microbiome_deseq", "run", "--features", "table.tsv", "--taxonomy", "taxonomy.tsv",
            "--metadata", "metadata.tsv",
        ]);
        assert!(missing.is_err());
    }
}

//! microbiome_deseq command-line interface

use clap::Parser;
use log::{info, LevelFilter};

use microbiome_deseq::cli::{Cli, Commands, RunArgs};
use microbiome_deseq::prelude::*;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let args: Vec<String> = std::env::args().collect();

    // Find the first non-flag argument (potential subcommand)
    let first_positional = args.iter().skip(1).find(|a| !a.starts_with('-'));
    let subcommands = ["run", "normalize", "help"];
    let has_subcommand = first_positional.is_some_and(|a| subcommands.contains(&a.as_str()));

    if !has_subcommand {
        if args.len() == 1 {
            print_no_args();
            return;
        }
        if args.iter().any(|a| a == "--help") {
            print_long_help();
            return;
        }
        if args.iter().any(|a| a == "-h") {
            print_short_help();
            return;
        }
        if args.iter().any(|a| a == "-V" || a == "--version") {
            println!("microbiome_deseq {}", VERSION);
            return;
        }
        print_no_args();
        return;
    }

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Some(Commands::Run(run_args)) => run_command(&run_args),
        Some(Commands::Normalize {
            features,
            output,
            method,
        }) => run_normalize(&features, &output, &method),
        None => {
            print_no_args();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Custom help output
// ---------------------------------------------------------------------------

fn print_no_args() {
    println!("microbiome_deseq v{}", VERSION);
    println!("Run `microbiome_deseq -h` for usage or `microbiome_deseq --help` for detailed information.");
}

fn print_short_help() {
    println!("microbiome_deseq v{}", VERSION);
    println!();
    println!("Usage: microbiome_deseq <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run        Run a differential abundance analysis");
    println!("  normalize  Normalize a feature table only");
    println!();
    println!("Run `microbiome_deseq help <COMMAND>` for command-specific options.");
}

fn print_long_help() {
    println!("microbiome_deseq v{}", VERSION);
    println!("Differential abundance analysis for microbiome amplicon data");
    println!();
    println!("Usage: microbiome_deseq <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run        Run a differential abundance analysis");
    println!("               - Joins feature table, taxonomy, tree and metadata");
    println!("               - Sample selection and prevalence filtering");
    println!("               - Negative binomial GLM with shrunken dispersions");
    println!("               - Wald test, Benjamini-Hochberg correction");
    println!("               - Optional Cook's distance outlier flagging");
    println!("  normalize  Normalize a feature table by size factors");
    println!();
    println!("Global Options:");
    println!("  -v, --verbose    Enable verbose output");
    println!("  -h               Print short help");
    println!("      --help       Print detailed help");
    println!("  -V, --version    Print version");
    println!();
    println!("Examples:");
    println!("  microbiome_deseq run --features table.tsv --taxonomy taxonomy.tsv \\");
    println!("    --metadata metadata.tsv --tree tree.nwk \\");
    println!("    --design Source --numerator Stool --denominator Soil -o results.tsv");
    println!();
    println!("  microbiome_deseq normalize --features table.tsv -o normalized.tsv");
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn run_command(args: &RunArgs) -> Result<()> {
    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()
            .ok();
    }

    let config = args.to_config()?;

    info!("Loading inputs");
    let dataset = load_dataset(&args.input_paths(), &args.assembly_options())?;

    let analysis = run_analysis(&dataset, &config)?;
    print!("{}", analysis.summary(&config));

    let rows = if args.all_results {
        annotate(&analysis.results, &analysis.dataset)?
    } else {
        analysis.annotated.clone()
    };
    write_results(&args.output, &rows)?;
    info!("Wrote {} rows to {}", rows.len(), args.output);

    if let Some(chart_path) = &args.chart {
        write_chart_json(chart_path, &analysis.chart)?;
        info!("Wrote chart series to {}", chart_path);
    }

    Ok(())
}

fn run_normalize(features_path: &str, output_path: &str, method: &str) -> Result<()> {
    info!("Loading feature table from: {}", features_path);
    let counts = read_feature_table(features_path)?;

    let method: SizeFactorMethod = method.parse()?;
    let size_factors = estimate_size_factors(counts.counts(), method)?;
    info!("Size factors ({}): {:?}", method, size_factors.to_vec());

    write_normalized_counts(output_path, &counts, &size_factors)?;
    info!("Normalized counts written to: {}", output_path);
    Ok(())
}

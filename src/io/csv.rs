//! Delimited-text reading and writing for abundance tables, taxonomy and metadata
//!
//! Files may be tab- or comma-separated. The delimiter is taken from the
//! header line: tab if it contains one, comma otherwise.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use ndarray::{Array1, Array2};

use crate::data::{is_missing_value, CountMatrix, PhyloTree, SampleMetadata, TaxRank, TaxonomyRecord};
use crate::error::{DaaError, Result};
use crate::normalization::normalized_counts;
use crate::report::{AnnotatedRow, ChartSeries};

/// Header accepted on BIOM-converted feature tables
const OTU_HEADER: &str = "#OTU ID";
/// QIIME2 metadata type directive rows
const QIIME2_DIRECTIVE: &str = "#q2:";

fn detect_delimiter(content: &str, is_header: impl Fn(&str) -> bool) -> u8 {
    let header = content.lines().find(|line| is_header(line)).unwrap_or("");
    if header.contains('\t') {
        b'\t'
    } else {
        b','
    }
}

/// All non-empty records of a delimited file, fields trimmed and unquoted
fn read_records(path: &Path, is_header: impl Fn(&str) -> bool) -> Result<Vec<StringRecord>> {
    let content = fs::read_to_string(path)?;
    let delimiter = detect_delimiter(&content, is_header);

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(content.as_bytes());

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        records.push(record);
    }
    Ok(records)
}

fn is_comment(record: &StringRecord) -> bool {
    record.get(0).is_some_and(|f| f.starts_with('#'))
}

fn is_feature_table_header(line: &str) -> bool {
    !line.trim().is_empty() && (!line.starts_with('#') || line.starts_with(OTU_HEADER))
}

/// Read a feature table: features in rows, samples in columns.
///
/// The first column holds feature keys. Comment lines starting with `#` are
/// skipped, except a `#OTU ID` header line.
pub fn read_feature_table<P: AsRef<Path>>(path: P) -> Result<CountMatrix> {
    let records = read_records(path.as_ref(), is_feature_table_header)?;
    let mut rows = records
        .into_iter()
        .filter(|r| !is_comment(r) || r.get(0) == Some(OTU_HEADER));

    let header = rows.next().ok_or_else(|| DaaError::EmptyData {
        reason: "feature table has no header".to_string(),
    })?;
    if header.len() < 2 {
        return Err(DaaError::InvalidCountMatrix {
            reason: "feature table header needs a feature column and at least one sample".to_string(),
        });
    }
    let sample_ids: Vec<String> = header.iter().skip(1).map(str::to_string).collect();
    let n_samples = sample_ids.len();

    let mut feature_ids = Vec::new();
    let mut values = Vec::new();
    for record in rows {
        if record.len() != n_samples + 1 {
            return Err(DaaError::InvalidCountMatrix {
                reason: format!(
                    "row '{}' has {} columns, expected {}",
                    &record[0],
                    record.len(),
                    n_samples + 1
                ),
            });
        }
        feature_ids.push(record[0].to_string());
        for field in record.iter().skip(1) {
            let count = field.parse::<f64>().map_err(|_| DaaError::InvalidCountMatrix {
                reason: format!("invalid count value '{}' for feature '{}'", field, &record[0]),
            })?;
            values.push(count);
        }
    }

    if feature_ids.is_empty() {
        return Err(DaaError::EmptyData {
            reason: "no features found in feature table".to_string(),
        });
    }

    let counts = Array2::from_shape_vec((feature_ids.len(), n_samples), values).map_err(|e| {
        DaaError::InvalidCountMatrix {
            reason: e.to_string(),
        }
    })?;
    log::info!(
        "Read feature table: {} features x {} samples",
        feature_ids.len(),
        n_samples
    );
    CountMatrix::new(counts, feature_ids, sample_ids)
}

fn find_column(header: &StringRecord, names: &[&str]) -> Option<usize> {
    header
        .iter()
        .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
}

/// Read taxonomy assignments with `Feature ID`, `Taxon` and optional
/// `Confidence` columns (QIIME2 export layout). Header names are matched
/// case-insensitively.
pub fn read_taxonomy<P: AsRef<Path>>(path: P) -> Result<Vec<TaxonomyRecord>> {
    let records = read_records(path.as_ref(), |line| !line.trim().is_empty())?;
    let mut rows = records.into_iter();

    let header = rows.next().ok_or_else(|| DaaError::EmptyData {
        reason: "taxonomy file is empty".to_string(),
    })?;
    let id_col = find_column(&header, &["Feature ID", "FeatureID", "feature_id", "#OTU ID"]).ok_or_else(|| {
        DaaError::InvalidInput {
            reason: "taxonomy file has no 'Feature ID' column".to_string(),
        }
    })?;
    let taxon_col = find_column(&header, &["Taxon", "Taxonomy"]).ok_or_else(|| DaaError::InvalidInput {
        reason: "taxonomy file has no 'Taxon' column".to_string(),
    })?;
    let confidence_col = find_column(&header, &["Confidence", "Consensus"]);

    let mut taxonomy = Vec::new();
    for record in rows.filter(|r| !is_comment(r)) {
        let feature_id = record.get(id_col).unwrap_or("").to_string();
        if feature_id.is_empty() {
            return Err(DaaError::InvalidInput {
                reason: "taxonomy row without a feature ID".to_string(),
            });
        }
        let taxon = record.get(taxon_col).unwrap_or("").to_string();
        let confidence = match confidence_col.and_then(|c| record.get(c)) {
            Some(v) if !is_missing_value(v) => Some(v.parse::<f64>().map_err(|_| DaaError::InvalidInput {
                reason: format!("invalid confidence '{}' for feature '{}'", v, feature_id),
            })?),
            _ => None,
        };
        taxonomy.push(TaxonomyRecord {
            feature_id,
            taxon,
            confidence,
        });
    }

    log::info!("Read {} taxonomy assignments", taxonomy.len());
    Ok(taxonomy)
}

/// Read sample metadata. The first column holds sample keys and the header
/// names the fields. QIIME2 `#q2:` directive rows and other comment rows
/// after the header are skipped.
pub fn read_metadata<P: AsRef<Path>>(path: P) -> Result<SampleMetadata> {
    let records = read_records(path.as_ref(), |line| {
        !line.trim().is_empty() && !line.starts_with(QIIME2_DIRECTIVE)
    })?;
    let mut rows = records.into_iter();

    let header = rows.next().ok_or_else(|| DaaError::EmptyData {
        reason: "metadata file is empty".to_string(),
    })?;
    let field_names: Vec<String> = header.iter().skip(1).map(str::to_string).collect();

    let mut sample_ids = Vec::new();
    let mut columns: Vec<Vec<String>> = vec![Vec::new(); field_names.len()];
    for record in rows {
        if record.get(0).is_some_and(|f| f.starts_with(QIIME2_DIRECTIVE)) || is_comment(&record) {
            continue;
        }
        if record.len() != field_names.len() + 1 {
            return Err(DaaError::InvalidMetadata {
                reason: format!(
                    "row '{}' has {} columns, expected {}",
                    &record[0],
                    record.len(),
                    field_names.len() + 1
                ),
            });
        }
        sample_ids.push(record[0].to_string());
        for (column, value) in columns.iter_mut().zip(record.iter().skip(1)) {
            column.push(value.to_string());
        }
    }

    if sample_ids.is_empty() {
        return Err(DaaError::EmptyData {
            reason: "no samples found in metadata".to_string(),
        });
    }

    let mut metadata = SampleMetadata::new(sample_ids)?;
    for (name, values) in field_names.iter().zip(columns) {
        metadata.add_field(name, values)?;
    }
    log::info!(
        "Read metadata: {} samples, {} fields",
        metadata.n_samples(),
        metadata.field_names().len()
    );
    Ok(metadata)
}

/// Read a Newick tree
pub fn read_tree<P: AsRef<Path>>(path: P) -> Result<PhyloTree> {
    let newick = fs::read_to_string(path)?;
    let tree = PhyloTree::from_newick(&newick)?;
    log::info!("Read tree with {} leaves", tree.n_leaves());
    Ok(tree)
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NA".to_string()
    } else {
        format!("{:.6}", value)
    }
}

fn format_pvalue(value: f64) -> String {
    if value.is_nan() {
        "NA".to_string()
    } else {
        format!("{:.6e}", value)
    }
}

/// Write annotated results as a tab-separated table
pub fn write_results<P: AsRef<Path>>(path: P, rows: &[AnnotatedRow]) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(BufWriter::new(File::create(path)?));

    let mut header = vec![
        "feature_id".to_string(),
        "baseMean".to_string(),
        "log2FoldChange".to_string(),
        "lfcSE".to_string(),
        "stat".to_string(),
        "pvalue".to_string(),
        "padj".to_string(),
    ];
    header.extend(TaxRank::all().iter().map(|r| r.name().to_string()));
    writer.write_record(&header)?;

    for row in rows {
        let r = &row.result;
        let mut record = vec![
            r.feature_id.clone(),
            format_value(r.base_mean),
            format_value(r.log2_fold_change),
            format_value(r.lfc_se),
            format_value(r.stat),
            format_pvalue(r.pvalue),
            format_pvalue(r.padj),
        ];
        record.extend(row.lineage.ranks().iter().cloned());
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write size-factor normalized counts as a tab-separated table
pub fn write_normalized_counts<P: AsRef<Path>>(path: P, counts: &CountMatrix, size_factors: &Array1<f64>) -> Result<()> {
    if size_factors.len() != counts.n_samples() {
        return Err(DaaError::DimensionMismatch {
            expected: format!("{} size factors", counts.n_samples()),
            got: format!("{} size factors", size_factors.len()),
        });
    }
    let normalized = normalized_counts(counts.counts(), size_factors);

    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(BufWriter::new(File::create(path)?));
    let mut header = vec!["feature_id".to_string()];
    header.extend(counts.sample_ids().iter().cloned());
    writer.write_record(&header)?;

    for (feature_id, row) in counts.feature_ids().iter().zip(normalized.rows()) {
        let mut record = vec![feature_id.clone()];
        record.extend(row.iter().map(|v| format!("{:.4}", v)));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the chart series as pretty-printed JSON
pub fn write_chart_json<P: AsRef<Path>>(path: P, chart: &ChartSeries) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, chart)?;
    Ok(())
}

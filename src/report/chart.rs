//! Category ordering and the effect-size chart data series

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::annotate::{AnnotatedRow, ValueField};
use crate::data::TaxRank;

/// How values are combined within a category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregator {
    #[default]
    Max,
    Min,
    Mean,
}

impl Aggregator {
    /// NaN inputs are skipped. `None` when nothing is left.
    fn aggregate(&self, values: &[f64]) -> Option<f64> {
        let finite: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
        if finite.is_empty() {
            return None;
        }
        Some(match self {
            Aggregator::Max => finite.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Aggregator::Min => finite.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregator::Mean => finite.iter().sum::<f64>() / finite.len() as f64,
        })
    }
}

/// Distinct labels of `field`, ordered by the aggregated `value`, largest first.
///
/// Ties are broken by label, ascending. Categories whose values are all NaN
/// go last, in label order.
pub fn display_order(rows: &[AnnotatedRow], field: TaxRank, value: ValueField, aggregator: Aggregator) -> Vec<String> {
    let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.rank(field)).or_default().push(row.value(value));
    }

    let mut keyed: Vec<(&str, Option<f64>)> = groups
        .iter()
        .map(|(label, values)| (*label, aggregator.aggregate(values)))
        .collect();

    keyed.sort_by(|a, b| match (a.1, b.1) {
        (Some(x), Some(y)) => y.total_cmp(&x).then_with(|| a.0.cmp(b.0)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.0.cmp(b.0),
    });

    keyed.into_iter().map(|(label, _)| label.to_string()).collect()
}

/// Chart layout options
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartOptions {
    /// Rank on the x axis
    pub x_field: TaxRank,
    /// Rank used for point colour
    pub color_field: TaxRank,
    /// Reference lines are drawn at +/- this value
    pub lfc_threshold: f64,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            x_field: TaxRank::Family,
            color_field: TaxRank::Phylum,
            lfc_threshold: 1.0,
        }
    }
}

/// One plotted feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub feature_id: String,
    pub x: String,
    pub y: f64,
    pub color: String,
}

/// Plot-ready data: points plus axis and legend orderings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub x_field: TaxRank,
    pub color_field: TaxRank,
    pub x_order: Vec<String>,
    pub color_order: Vec<String>,
    pub reference_lines: Vec<f64>,
    pub points: Vec<ChartPoint>,
}

/// Build the log2 fold change chart series for `rows`.
pub fn chart_series(rows: &[AnnotatedRow], options: &ChartOptions) -> ChartSeries {
    let points: Vec<ChartPoint> = rows
        .iter()
        .filter(|row| row.result.log2_fold_change.is_finite())
        .map(|row| ChartPoint {
            feature_id: row.feature_id().to_string(),
            x: row.rank(options.x_field).to_string(),
            y: row.result.log2_fold_change,
            color: row.rank(options.color_field).to_string(),
        })
        .collect();
    if points.len() < rows.len() {
        log::debug!("{} rows without a log2 fold change left out of the chart", rows.len() - points.len());
    }

    let threshold = options.lfc_threshold.abs();
    ChartSeries {
        x_field: options.x_field,
        color_field: options.color_field,
        x_order: display_order(rows, options.x_field, ValueField::Log2FoldChange, Aggregator::Max),
        color_order: display_order(rows, options.color_field, ValueField::Log2FoldChange, Aggregator::Max),
        reference_lines: vec![-threshold, threshold],
        points,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{parse_lineage, TaxonomyParseOptions};
    use crate::io::FeatureResult;

    fn row(id: &str, lineage: &str, lfc: f64) -> AnnotatedRow {
        AnnotatedRow {
            result: FeatureResult {
                feature_id: id.to_string(),
                base_mean: 10.0,
                log2_fold_change: lfc,
                lfc_se: 0.5,
                stat: lfc / 0.5,
                pvalue: 0.001,
                padj: 0.002,
                dispersion: 0.1,
            },
            lineage: parse_lineage(id, lineage, &TaxonomyParseOptions::default()).unwrap(),
        }
    }

    fn rows() -> Vec<AnnotatedRow> {
        vec![
            row("a", "k__Bacteria; p__Firmicutes; c__C; o__O; f__Lachnospiraceae", -2.0),
            row("b", "k__Bacteria; p__Firmicutes; c__C; o__O; f__Ruminococcaceae", 3.0),
            row("c", "k__Bacteria; p__Bacteroidetes; c__C; o__O; f__Bacteroidaceae", 1.5),
            row("d", "k__Bacteria; p__Firmicutes; c__C; o__O; f__Lachnospiraceae", 4.0),
            row("e", "k__Bacteria; p__Proteobacteria; c__C; o__O; f__Enterobacteriaceae", f64::NAN),
        ]
    }

    #[test]
    fn test_display_order_by_max() {
        let order = display_order(&rows(), TaxRank::Family, ValueField::Log2FoldChange, Aggregator::Max);
        assert_eq!(
            order,
            vec!["Lachnospiraceae", "Ruminococcaceae", "Bacteroidaceae", "Enterobacteriaceae"]
        );
    }

    #[test]
    fn test_display_order_min_and_mean() {
        let rows = rows();
        let by_min = display_order(&rows, TaxRank::Family, ValueField::Log2FoldChange, Aggregator::Min);
        assert_eq!(by_min[0], "Ruminococcaceae");
        assert_eq!(by_min[2], "Lachnospiraceae");

        let by_mean = display_order(&rows, TaxRank::Family, ValueField::Log2FoldChange, Aggregator::Mean);
        assert_eq!(
            by_mean,
            vec!["Ruminococcaceae", "Bacteroidaceae", "Lachnospiraceae", "Enterobacteriaceae"]
        );
    }

    #[test]
    fn test_display_order_ties_by_label() {
        let rows = vec![
            row("x", "k__B; p__Zeta", 2.0),
            row("y", "k__B; p__Alpha", 2.0),
            row("z", "k__B; p__Mid", 1.0),
        ];
        let order = display_order(&rows, TaxRank::Phylum, ValueField::Log2FoldChange, Aggregator::Max);
        assert_eq!(order, vec!["Alpha", "Zeta", "Mid"]);
    }

    #[test]
    fn test_chart_series() {
        let rows = rows();
        let chart = chart_series(&rows, &ChartOptions::default());

        assert_eq!(chart.points.len(), 4);
        assert_eq!(chart.reference_lines, vec![-1.0, 1.0]);
        assert_eq!(chart.color_order[0], "Firmicutes");
        assert_eq!(chart.x_order[0], "Lachnospiraceae");
        let point = chart.points.iter().find(|p| p.feature_id == "c").unwrap();
        assert_eq!(point.x, "Bacteroidaceae");
        assert_eq!(point.color, "Bacteroidetes");
        assert_eq!(point.y, 1.5);

        let json = serde_json::to_string(&chart).unwrap();
        assert!(json.contains("\"x_order\""));
        assert!(json.contains("\"Family\""));
    }
}

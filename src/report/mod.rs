//! Annotated result tables and chart data

mod annotate;
mod chart;

pub use annotate::{annotate, AnnotatedRow, ValueField};
pub use chart::{chart_series, display_order, Aggregator, ChartOptions, ChartPoint, ChartSeries};

//! Report
//!
//! Presentation helpers for evaluation results.
use crate::config::JsonIO;
use crate::metrics::evaluation::{EvaluationReport, Grouping, MetricTable};
use crate::metrics::BinMetric;
use crate::utils::precision_round;

impl JsonIO for EvaluationReport {}

/// Bin labels in display order. Bin `num_bins - 1` holds the most uncertain
/// samples and is shown first as `B{num_bins}`.
pub fn bin_labels(num_bins: usize) -> Vec<String> {
    (1..=num_bins).rev().map(|b| format!("B{}", b)).collect()
}

fn fmt_cell(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{}", precision_round(v, 4)),
        None => "-".to_string(),
    }
}

/// One line per group with `metric` of every bin, in display order.
pub fn format_table(table: &MetricTable, metric: BinMetric) -> String {
    let num_bins = table.groups.first().map_or(0, |g| g.bins.num_bins());
    let direction = if metric.maximize() { "higher" } else { "lower" };
    let mut lines = vec![format!(
        "{} {} {:?} ({} is better) [{}]",
        table.model,
        table.measure,
        metric,
        direction,
        bin_labels(num_bins).join(", ")
    )];
    for group in &table.groups {
        let mut label = Vec::new();
        if let Some(landmark) = group.key.landmark {
            label.push(format!("L{}", landmark));
        }
        if let Some(fold) = group.key.fold {
            label.push(format!("F{}", fold));
        }
        if label.is_empty() {
            label.push("All".to_string());
        }
        let cells: Vec<String> = (0..num_bins)
            .rev()
            .map(|b| fmt_cell(group.bins.value(metric, b)))
            .collect();
        lines.push(format!("  {}: {}", label.join(" "), cells.join(", ")));
    }
    lines.join("\n")
}

/// Tables of `metrics` for every (model, measure) under `grouping`.
pub fn format_tables(report: &EvaluationReport, grouping: Grouping, metrics: &[BinMetric]) -> String {
    report
        .tables(grouping)
        .iter()
        .flat_map(|table| metrics.iter().map(move |m| format_table(table, *m)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pooled tables of every metric, as logged at the end of an evaluation.
pub fn format_summary(report: &EvaluationReport) -> String {
    format_tables(report, Grouping::Pooled, &BinMetric::ALL)
}
